use actix_web::dev::Payload;
use actix_web::{FromRequest, HttpRequest};
use std::future::{ready, Ready};
use uuid::Uuid;

use crate::domain::identity::{Principal, Role};
use crate::domain::request::RequestError;

// Identity set by the upstream gateway. A missing role header means buyer.

pub const USER_ID_HEADER: &str = "X-User-Id";
pub const USER_ROLE_HEADER: &str = "X-User-Role";

impl FromRequest for Principal {
    type Error = RequestError;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _payload: &mut Payload) -> Self::Future {
        ready(principal_from(req))
    }
}

fn principal_from(req: &HttpRequest) -> Result<Principal, RequestError> {
    let user_id = header(req, USER_ID_HEADER)
        .ok_or_else(|| RequestError::Unauthorized(format!("missing {} header", USER_ID_HEADER)))?
        .parse::<Uuid>()
        .map_err(|_| RequestError::Unauthorized(format!("{} must be a UUID", USER_ID_HEADER)))?;

    let role = match header(req, USER_ROLE_HEADER) {
        Some(raw) => raw.parse::<Role>().map_err(RequestError::Unauthorized)?,
        None => Role::Buyer,
    };

    Ok(Principal::new(user_id, role))
}

fn header<'a>(req: &'a HttpRequest, name: &str) -> Option<&'a str> {
    req.headers().get(name).and_then(|value| value.to_str().ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::test::TestRequest;

    #[test]
    fn test_principal_from_headers() {
        let user_id = Uuid::new_v4();
        let req = TestRequest::default()
            .insert_header((USER_ID_HEADER, user_id.to_string()))
            .insert_header((USER_ROLE_HEADER, "manager"))
            .to_http_request();

        let principal = principal_from(&req).unwrap();
        assert_eq!(principal.user_id, user_id);
        assert_eq!(principal.role, Role::Manager);
    }

    #[test]
    fn test_role_defaults_to_buyer() {
        let req = TestRequest::default()
            .insert_header((USER_ID_HEADER, Uuid::new_v4().to_string()))
            .to_http_request();

        assert_eq!(principal_from(&req).unwrap().role, Role::Buyer);
    }

    #[test]
    fn test_missing_or_malformed_identity() {
        let missing = TestRequest::default().to_http_request();
        assert!(matches!(
            principal_from(&missing),
            Err(RequestError::Unauthorized(_))
        ));

        let malformed = TestRequest::default()
            .insert_header((USER_ID_HEADER, "not-a-uuid"))
            .to_http_request();
        assert!(matches!(
            principal_from(&malformed),
            Err(RequestError::Unauthorized(_))
        ));
    }
}
