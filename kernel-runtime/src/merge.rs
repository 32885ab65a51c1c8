//! Aggregation of independent failures

use std::fmt;

/// Every failure from a group of independent operations, in the order they
/// were observed. Never constructed empty.
#[derive(Debug)]
pub struct MergedError {
    errors: Vec<anyhow::Error>,
}

impl MergedError {
    /// `None` when there is nothing to report
    pub fn from_errors(errors: Vec<anyhow::Error>) -> Option<Self> {
        if errors.is_empty() {
            None
        } else {
            Some(Self { errors })
        }
    }

    /// Collect the failures of `results`; `Ok` only if every result is `Ok`.
    pub fn collect<I, E>(results: I) -> Result<(), MergedError>
    where
        I: IntoIterator<Item = Result<(), E>>,
        E: Into<anyhow::Error>,
    {
        let errors = results
            .into_iter()
            .filter_map(|result| result.err().map(Into::into))
            .collect();
        match Self::from_errors(errors) {
            Some(merged) => Err(merged),
            None => Ok(()),
        }
    }

    pub fn errors(&self) -> &[anyhow::Error] {
        &self.errors
    }

    pub fn len(&self) -> usize {
        self.errors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn into_errors(self) -> Vec<anyhow::Error> {
        self.errors
    }
}

impl fmt::Display for MergedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let [only] = self.errors.as_slice() {
            return write!(f, "{:#}", only);
        }
        write!(f, "{} failures", self.errors.len())?;
        for (index, error) in self.errors.iter().enumerate() {
            write!(f, "; [{}] {:#}", index + 1, error)?;
        }
        Ok(())
    }
}

impl std::error::Error for MergedError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.errors
            .first()
            .map(|error| -> &(dyn std::error::Error + 'static) { error.as_ref() })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collect_keeps_every_failure() {
        let results: Vec<Result<(), std::io::Error>> = vec![
            Err(std::io::Error::other("shell")),
            Ok(()),
            Err(std::io::Error::other("iopub")),
        ];
        let merged = MergedError::collect(results).unwrap_err();
        assert_eq!(merged.len(), 2);
        let text = merged.to_string();
        assert!(text.starts_with("2 failures"));
        assert!(text.contains("[1] shell"));
        assert!(text.contains("[2] iopub"));
    }

    #[test]
    fn test_single_and_empty() {
        assert!(MergedError::collect(Vec::<Result<(), std::io::Error>>::new()).is_ok());
        assert!(MergedError::from_errors(vec![]).is_none());

        let merged = MergedError::from_errors(vec![anyhow::anyhow!("only")]).unwrap();
        assert_eq!(merged.to_string(), "only");
        assert!(std::error::Error::source(&merged).is_some());
    }
}
