// Warp error handling and propagation
// Courtesy of https://github.com/seanmonstar/warp/pull/909#issuecomment-1184854848
//
// Usage:
//
//   1) A handler function, instead of returning a Warp reply/rejection, returns a
//   `Result<Reply, ApiError>.`
//
//   Rejections are meant to say "this filter can't handle this request, but maybe
//   some other can". An error in one of our handlers is final, and returning a
//   Result lets the handler bail out with the ? operator.
//
//   2) ApiError knows how to convert itself to an HTTP response + status code, allowing
//   us to implement Reply for ApiError.
//
//   3) We can't implement Reply for Result<Reply, Reply> (we don't control Result), so we have to
//   add a final function `into_response` that converts our Result into a Response:
//
//   ```
//   .then(my_handler_func)
//   .map(into_response)
//   ```
//

use std::future::Future;
use std::time::Duration;

use serde_json::json;
use tracing::error;
use warp::hyper::{Body, Response, StatusCode};
use warp::Reply;

use crate::error::{Error, ErrorKind};

const INTERNAL_ERROR_MESSAGE: &str = "Internal Error";

#[derive(Debug)]
pub enum ApiError {
    Domain(Error),
    Timeout(Duration),
}

// Wrap domain errors so that handlers can return them with the `?` operator
impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        ApiError::Domain(err)
    }
}

impl ApiError {
    fn status_code_body(self: ApiError) -> (StatusCode, String) {
        let (status, code, message) = match self {
            ApiError::Domain(Error {
                kind: ErrorKind::Internal,
                message,
            }) => {
                // Driver and connection details stay in the server log
                error!("Internal error: {message}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ErrorKind::Internal.to_string(),
                    INTERNAL_ERROR_MESSAGE.to_string(),
                )
            }
            ApiError::Domain(Error { kind, message }) => {
                let status = match kind {
                    ErrorKind::Validation => StatusCode::BAD_REQUEST,
                    ErrorKind::NotFound => StatusCode::NOT_FOUND,
                    ErrorKind::Conflict => StatusCode::CONFLICT,
                    ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
                };
                (status, kind.to_string(), message)
            }
            ApiError::Timeout(after) => (
                StatusCode::GATEWAY_TIMEOUT,
                "timeout".to_string(),
                format!("request didn't complete within {after:?}"),
            ),
        };

        (
            status,
            json!({"code": code, "message": message}).to_string(),
        )
    }
}

impl Reply for ApiError {
    fn into_response(self) -> Response<Body> {
        let (status, body) = self.status_code_body();
        let mut response = Response::new(Body::from(body));
        *response.status_mut() = status;
        response.headers_mut().insert(
            warp::http::header::CONTENT_TYPE,
            warp::http::HeaderValue::from_static("application/json"),
        );
        response
    }
}

pub fn into_response<S: Reply, E: Reply>(reply_res: Result<S, E>) -> Response<Body> {
    match reply_res {
        Ok(resp) => resp.into_response(),
        Err(err) => err.into_response(),
    }
}

/// Run a handler with a deadline. On expiry the handler future is dropped,
/// along with any transaction it had open.
pub async fn with_timeout<T, F>(timeout: Duration, handler: F) -> Result<T, ApiError>
where
    F: Future<Output = Result<T, ApiError>>,
{
    tokio::time::timeout(timeout, handler)
        .await
        .unwrap_or(Err(ApiError::Timeout(timeout)))
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case(Error::validation("bad"), StatusCode::BAD_REQUEST, "invalid")]
    #[case(Error::not_found("gone"), StatusCode::NOT_FOUND, "not_found")]
    #[case(Error::conflict("taken"), StatusCode::CONFLICT, "conflict")]
    fn test_status_code_body(
        #[case] error: Error,
        #[case] expected_status: StatusCode,
        #[case] expected_code: &str,
    ) {
        let message = error.message.clone();
        let (status, body) = ApiError::from(error).status_code_body();

        assert_eq!(status, expected_status);
        assert_eq!(
            serde_json::from_str::<serde_json::Value>(&body).unwrap(),
            json!({"code": expected_code, "message": message})
        );
    }

    #[test]
    fn test_internal_error_details_are_not_sent() {
        let error = Error::internal("error returned from database: connection refused");
        let (status, body) = ApiError::from(error).status_code_body();

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(
            serde_json::from_str::<serde_json::Value>(&body).unwrap(),
            json!({"code": "internal", "message": "Internal Error"})
        );
    }

    #[tokio::test]
    async fn test_with_timeout() {
        let ok = with_timeout(Duration::from_secs(5), async { Ok::<_, ApiError>(1) }).await;
        assert_eq!(ok.unwrap(), 1);

        let slow = with_timeout(Duration::from_millis(10), async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok::<_, ApiError>(1)
        })
        .await;
        let response = slow.unwrap_err().into_response();
        assert_eq!(response.status(), StatusCode::GATEWAY_TIMEOUT);
    }
}
