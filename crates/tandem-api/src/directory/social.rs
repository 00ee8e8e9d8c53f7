use tracing::info;
use uuid::Uuid;

use tandem_db::social::AcceptOutcome;
use tandem_types::api::FriendRequestsResponse;
use tandem_types::models::{FriendRequest, FriendRequestView, PublicProfile};

use super::{Directory, parse_user_id};
use crate::error::ApiError;

impl Directory {
    pub fn recommended_users(&self, me: Uuid) -> Result<Vec<PublicProfile>, ApiError> {
        let rows = self.db().recommended_accounts(&me.to_string())?;
        Ok(rows.into_iter().map(PublicProfile::from).collect())
    }

    pub fn friends(&self, me: Uuid) -> Result<Vec<PublicProfile>, ApiError> {
        let rows = self.db().list_friends(&me.to_string())?;
        Ok(rows.into_iter().map(PublicProfile::from).collect())
    }

    pub fn send_friend_request(&self, me: Uuid, recipient: &str) -> Result<FriendRequest, ApiError> {
        let recipient = parse_user_id(recipient)?;
        if recipient == me {
            return Err(ApiError::validation("You can't send friend request to yourself"));
        }

        let (me, recipient) = (me.to_string(), recipient.to_string());
        if !self.db().account_exists(&recipient)? {
            return Err(ApiError::NotFound("Recipient not found"));
        }
        if self.db().are_friends(&me, &recipient)? {
            return Err(ApiError::Conflict("You are already friends with this user"));
        }
        if self.db().friend_request_between(&me, &recipient)?.is_some() {
            return Err(ApiError::Conflict(DUPLICATE_REQUEST));
        }

        let id = Uuid::new_v4().to_string();
        self.db()
            .create_friend_request(&id, &me, &recipient)
            .map_err(|e| {
                if tandem_db::is_unique_violation(&e) {
                    ApiError::Conflict(DUPLICATE_REQUEST)
                } else {
                    ApiError::Internal(e)
                }
            })?;

        info!("Friend request {} from {} to {}", id, me, recipient);
        self.friend_request(&id)
    }

    /// Only the addressed account may accept, and only once.
    pub fn accept_friend_request(&self, me: Uuid, request_id: &str) -> Result<FriendRequest, ApiError> {
        let Ok(request_id) = request_id.parse::<Uuid>() else {
            return Err(ApiError::NotFound(REQUEST_NOT_FOUND));
        };
        let request_id = request_id.to_string();

        match self.db().accept_friend_request(&request_id, &me.to_string())? {
            AcceptOutcome::Accepted => {
                info!("Friend request {} accepted", request_id);
                self.friend_request(&request_id)
            }
            AcceptOutcome::NotFound => Err(ApiError::NotFound(REQUEST_NOT_FOUND)),
            AcceptOutcome::NotRecipient => {
                Err(ApiError::Forbidden("You are not authorized to accept this request"))
            }
            AcceptOutcome::AlreadyAccepted => Err(ApiError::Conflict("Friend request already accepted")),
        }
    }

    /// Pending requests addressed to me, plus my own requests that were accepted.
    pub fn friend_requests(&self, me: Uuid) -> Result<FriendRequestsResponse, ApiError> {
        let me = me.to_string();
        let incoming = self.db().incoming_friend_requests(&me)?;
        let accepted = self.db().accepted_friend_requests(&me)?;
        Ok(FriendRequestsResponse {
            incoming_reqs: incoming.into_iter().map(FriendRequestView::from).collect(),
            accepted_reqs: accepted.into_iter().map(FriendRequestView::from).collect(),
        })
    }

    pub fn outgoing_friend_requests(&self, me: Uuid) -> Result<Vec<FriendRequestView>, ApiError> {
        let rows = self.db().outgoing_friend_requests(&me.to_string())?;
        Ok(rows.into_iter().map(FriendRequestView::from).collect())
    }

    fn friend_request(&self, id: &str) -> Result<FriendRequest, ApiError> {
        self.db()
            .get_friend_request(id)?
            .map(FriendRequest::from)
            .ok_or(ApiError::NotFound(REQUEST_NOT_FOUND))
    }
}

const DUPLICATE_REQUEST: &str = "A friend request already exists between you and this user";
const REQUEST_NOT_FOUND: &str = "Friend request not found";

#[cfg(test)]
mod tests {
    use tandem_types::models::FriendRequestStatus;

    use super::*;
    use crate::directory::tests::{directory, onboarded, signup};

    #[test]
    fn duplicate_requests_rejected_in_both_directions() {
        let dir = directory();
        let a = signup(&dir, "a@x.com").user.id;
        let b = signup(&dir, "b@x.com").user.id;

        let request = dir.send_friend_request(a, &b.to_string()).unwrap();
        assert_eq!(request.status, FriendRequestStatus::Pending);

        let again = dir.send_friend_request(a, &b.to_string()).err().unwrap();
        let reverse = dir.send_friend_request(b, &a.to_string()).err().unwrap();
        assert!(matches!(again, ApiError::Conflict(DUPLICATE_REQUEST)));
        assert!(matches!(reverse, ApiError::Conflict(DUPLICATE_REQUEST)));
    }

    #[test]
    fn self_and_unknown_recipients_are_rejected() {
        let dir = directory();
        let a = signup(&dir, "a@x.com").user.id;

        assert!(matches!(
            dir.send_friend_request(a, &a.to_string()).err().unwrap(),
            ApiError::Validation { .. }
        ));
        assert!(matches!(
            dir.send_friend_request(a, &Uuid::new_v4().to_string()).err().unwrap(),
            ApiError::NotFound("Recipient not found")
        ));
        assert!(matches!(
            dir.send_friend_request(a, "not-a-uuid").err().unwrap(),
            ApiError::Validation { .. }
        ));
    }

    #[test]
    fn accept_links_both_accounts_once() {
        let dir = directory();
        let a = signup(&dir, "a@x.com").user.id;
        let b = signup(&dir, "b@x.com").user.id;
        let c = signup(&dir, "c@x.com").user.id;

        let request = dir.send_friend_request(a, &b.to_string()).unwrap();
        let id = request.id.to_string();

        assert!(matches!(
            dir.accept_friend_request(c, &id).err().unwrap(),
            ApiError::Forbidden(_)
        ));

        let accepted = dir.accept_friend_request(b, &id).unwrap();
        assert_eq!(accepted.status, FriendRequestStatus::Accepted);
        assert!(matches!(
            dir.accept_friend_request(b, &id).err().unwrap(),
            ApiError::Conflict(_)
        ));

        assert_eq!(dir.friends(a).unwrap().len(), 1);
        assert_eq!(dir.friends(b).unwrap()[0].id, a);
        assert_eq!(dir.load_user(&a.to_string()).unwrap().unwrap().friends, vec![b]);

        let requests = dir.friend_requests(a).unwrap();
        assert!(requests.incoming_reqs.is_empty());
        assert_eq!(requests.accepted_reqs.len(), 1);
        assert_eq!(requests.accepted_reqs[0].recipient.id, b);

        assert!(matches!(
            dir.send_friend_request(a, &b.to_string()).err().unwrap(),
            ApiError::Conflict("You are already friends with this user")
        ));
    }

    #[test]
    fn accepting_unknown_request_is_not_found() {
        let dir = directory();
        let a = signup(&dir, "a@x.com").user.id;
        assert!(matches!(
            dir.accept_friend_request(a, &Uuid::new_v4().to_string()).err().unwrap(),
            ApiError::NotFound(REQUEST_NOT_FOUND)
        ));
        assert!(matches!(
            dir.accept_friend_request(a, "garbage").err().unwrap(),
            ApiError::NotFound(REQUEST_NOT_FOUND)
        ));
    }

    #[test]
    fn recommendations_skip_self_friends_and_pending() {
        let dir = directory();
        let me = onboarded(&dir, "me@x.com").id;
        let pending = onboarded(&dir, "pending@x.com").id;
        let stranger = onboarded(&dir, "stranger@x.com").id;
        signup(&dir, "not-onboarded@x.com");

        dir.send_friend_request(pending, &me.to_string()).unwrap();

        let ids: Vec<Uuid> = dir.recommended_users(me).unwrap().into_iter().map(|p| p.id).collect();
        assert_eq!(ids, vec![stranger]);

        let outgoing = dir.outgoing_friend_requests(pending).unwrap();
        assert_eq!(outgoing.len(), 1);
        assert_eq!(outgoing[0].recipient.id, me);
        assert_eq!(dir.friend_requests(me).unwrap().incoming_reqs[0].sender.id, pending);
    }
}
