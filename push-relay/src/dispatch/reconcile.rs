//! Classification of per-token send results.

use fcm::{BatchResponse, MessagingErrorCode};

/// Failed tokens of one multicast, split by whether they can ever succeed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FailureSummary {
    /// Tokens to drop from the registry.
    pub permanent: Vec<String>,
    /// Tokens that failed for reasons unrelated to the token itself.
    pub transient: Vec<(String, MessagingErrorCode)>,
}

impl FailureSummary {
    pub fn is_empty(&self) -> bool {
        self.permanent.is_empty() && self.transient.is_empty()
    }
}

/// Pair each result with the token it was sent to (same index) and classify
/// the failures.
pub fn classify_failures(tokens: &[String], batch: &BatchResponse) -> FailureSummary {
    let mut summary = FailureSummary::default();
    for (token, response) in tokens.iter().zip(&batch.responses) {
        let Some(error) = &response.error else {
            continue;
        };
        if error.code.is_permanent_token_failure() {
            summary.permanent.push(token.clone());
        } else {
            summary.transient.push((token.clone(), error.code));
        }
    }
    summary
}

#[cfg(test)]
mod tests {
    use super::*;
    use fcm::SendResponse;

    #[test]
    fn splits_permanent_from_transient() {
        let tokens: Vec<String> = ["A", "B", "C", "D"].iter().map(|t| t.to_string()).collect();
        let batch = BatchResponse::new(vec![
            SendResponse::success("m1"),
            SendResponse::failure(MessagingErrorCode::RegistrationTokenNotRegistered, "gone"),
            SendResponse::failure(MessagingErrorCode::Unavailable, "later"),
            SendResponse::failure(MessagingErrorCode::InvalidRegistrationToken, "bad"),
        ]);

        let summary = classify_failures(&tokens, &batch);
        assert_eq!(summary.permanent, vec!["B".to_string(), "D".to_string()]);
        assert_eq!(
            summary.transient,
            vec![("C".to_string(), MessagingErrorCode::Unavailable)]
        );
    }

    #[test]
    fn all_successes_is_empty() {
        let tokens = vec!["A".to_string()];
        let batch = BatchResponse::new(vec![SendResponse::success("m1")]);
        assert!(classify_failures(&tokens, &batch).is_empty());
    }
}
