use tracing::info;
use uuid::Uuid;

use tandem_types::api::{CallRatingRequest, UserRatingResponse};
use tandem_types::models::{CallRating, CallType};

use super::{Directory, parse_user_id};
use crate::error::ApiError;

const CALL_ID_MAX: usize = 255;

impl Directory {
    pub fn rate_call(&self, rater: Uuid, req: CallRatingRequest) -> Result<CallRating, ApiError> {
        let call_id = req.call_id.as_deref().map(str::trim).unwrap_or_default();
        let rated = req.rated_user_id.as_deref().map(str::trim).unwrap_or_default();
        let rating = match req.rating.as_ref() {
            Some(rating) if !call_id.is_empty() && !rated.is_empty() => rating,
            _ => return Err(ApiError::validation("callId, ratedUserId and rating are required")),
        };
        if call_id.chars().count() > CALL_ID_MAX {
            return Err(ApiError::validation("callId is too long"));
        }

        let rating = rating
            .as_u64()
            .filter(|r| (1..=5).contains(r))
            .ok_or_else(|| ApiError::validation("Rating must be an integer between 1 and 5"))?
            as u8;

        let rated = parse_user_id(rated)?;
        if rated == rater {
            return Err(ApiError::validation("You cannot rate yourself"));
        }
        let rated = rated.to_string();
        if !self.db().account_exists(&rated)? {
            return Err(ApiError::NotFound("Rated user not found"));
        }

        let call_type = req
            .call_type
            .as_deref()
            .and_then(CallType::parse)
            .unwrap_or_default();

        let row = self.db().insert_call_rating(
            &Uuid::new_v4().to_string(),
            call_id,
            &rater.to_string(),
            &rated,
            rating,
            call_type.as_str(),
        )?;
        info!("Call {} rated {} by {}", call_id, rating, rater);
        Ok(row.into())
    }

    /// Average rounded to one decimal; zero when nobody has rated the user.
    pub fn rating_summary(&self, user_id: &str) -> Result<UserRatingResponse, ApiError> {
        let user_id = parse_user_id(user_id)?;
        let (average, total) = self.db().rating_summary(&user_id.to_string())?;
        Ok(UserRatingResponse {
            user_id,
            average_rating: (average * 10.0).round() / 10.0,
            total_ratings: total,
        })
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::directory::tests::{directory, signup};

    fn request(rated: Uuid, rating: serde_json::Value) -> CallRatingRequest {
        CallRatingRequest {
            call_id: Some("call-1".into()),
            rated_user_id: Some(rated.to_string()),
            rating: Some(rating),
            call_type: None,
        }
    }

    #[test]
    fn ratings_are_averaged_to_one_decimal() {
        let dir = directory();
        let a = signup(&dir, "a@x.com").user.id;
        let b = signup(&dir, "b@x.com").user.id;

        let first = dir.rate_call(a, request(b, json!(5))).unwrap();
        assert_eq!(first.call_type, CallType::Video);
        dir.rate_call(a, request(b, json!(4))).unwrap();
        dir.rate_call(a, request(b, json!(4))).unwrap();

        let summary = dir.rating_summary(&b.to_string()).unwrap();
        assert_eq!(summary.total_ratings, 3);
        assert_eq!(summary.average_rating, 4.3);

        let empty = dir.rating_summary(&a.to_string()).unwrap();
        assert_eq!((empty.average_rating, empty.total_ratings), (0.0, 0));
    }

    #[test]
    fn invalid_ratings_are_rejected() {
        let dir = directory();
        let a = signup(&dir, "a@x.com").user.id;
        let b = signup(&dir, "b@x.com").user.id;

        for bad in [json!(0), json!(6), json!(4.5), json!("5"), json!(-1)] {
            assert!(matches!(
                dir.rate_call(a, request(b, bad)).err().unwrap(),
                ApiError::Validation { .. }
            ));
        }
        assert!(matches!(
            dir.rate_call(a, request(a, json!(5))).err().unwrap(),
            ApiError::Validation { .. }
        ));
        assert!(matches!(
            dir.rate_call(a, request(Uuid::new_v4(), json!(5))).err().unwrap(),
            ApiError::NotFound(_)
        ));
    }
}
