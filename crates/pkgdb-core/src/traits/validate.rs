/// Outcome of validating one header blob.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Accept,
    /// Accepted, with a diagnostic worth logging (e.g. unknown signing key).
    Note(String),
    /// Integrity failure. Aborts the current scan or rebuild.
    Reject(String),
}

impl Verdict {
    pub fn is_reject(&self) -> bool {
        matches!(self, Verdict::Reject(_))
    }
}

/// Header validation capability (signature / digest checks).
///
/// Invoked on every header fetched by a match iterator and on every record
/// copied by a rebuild. Closures `Fn(&[u8]) -> Verdict` implement it directly.
pub trait HeaderValidator: Send + Sync {
    fn validate(&self, blob: &[u8]) -> Verdict;
}

impl<F> HeaderValidator for F
where
    F: Fn(&[u8]) -> Verdict + Send + Sync,
{
    fn validate(&self, blob: &[u8]) -> Verdict {
        self(blob)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_closure_is_a_validator() {
        let reject_empty = |blob: &[u8]| {
            if blob.is_empty() {
                Verdict::Reject("empty blob".into())
            } else {
                Verdict::Accept
            }
        };
        assert!(reject_empty.validate(b"").is_reject());
        assert_eq!(reject_empty.validate(b"x"), Verdict::Accept);
    }
}
