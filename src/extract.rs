use axum::async_trait;
use axum::body::Bytes;
use axum::extract::{FromRequest, Request};
use serde::de::DeserializeOwned;

use crate::errors::AppError;

/// Strict JSON body extractor. Unlike `axum::Json` it reports the path of the
/// field that failed to deserialize, so "missing required field" and "unknown
/// field" rejections name the culprit.
pub struct AppJson<T>(pub T);

#[async_trait]
impl<S, T> FromRequest<S> for AppJson<T>
where
    S: Send + Sync,
    T: DeserializeOwned,
{
    type Rejection = AppError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let bytes = Bytes::from_request(req, state)
            .await
            .map_err(|err| AppError::bad_request(format!("failed to read body: {err}")))?;

        let deserializer = &mut serde_json::Deserializer::from_slice(&bytes);
        let value = serde_path_to_error::deserialize(deserializer).map_err(|err| {
            let path = err.path().to_string();
            if path == "." {
                AppError::bad_request(format!("invalid request body: {}", err.inner()))
            } else {
                AppError::bad_request(format!("invalid request body at `{path}`: {}", err.inner()))
            }
        })?;

        Ok(AppJson(value))
    }
}

#[cfg(test)]
mod tests {
    use serde::Deserialize;

    #[derive(Debug, Deserialize)]
    #[serde(deny_unknown_fields)]
    struct Sample {
        name: String,
    }

    #[test]
    fn error_names_offending_field() {
        let deserializer = &mut serde_json::Deserializer::from_str(r#"{"name": 42}"#);
        let err = serde_path_to_error::deserialize::<_, Sample>(deserializer).unwrap_err();
        assert_eq!(err.path().to_string(), "name");
    }

    #[test]
    fn unknown_field_rejected() {
        let deserializer = &mut serde_json::Deserializer::from_str(r#"{"name": "x", "extra": 1}"#);
        assert!(serde_path_to_error::deserialize::<_, Sample>(deserializer).is_err());
    }
}
