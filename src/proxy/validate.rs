//! Typed request validation for the inference routes.
//!
//! [`ValidatedInference`] runs before the handler body: it decodes the JSON
//! body into the route's request type, resolves the endpoint serving the
//! requested model and starts the request's [`InferenceTimer`]. A rejection
//! here records the request as `invalid` with an empty model name.

use async_trait::async_trait;
use axum::extract::{FromRequest, Request};
use axum::Json;

use super::server::AppState;
use super::types::InferenceRequest;
use crate::endpoint::Endpoint;
use crate::error::Error;
use crate::metrics::{InferenceTimer, Outcome};

/// An inference request that decoded cleanly and names a served model.
pub struct ValidatedInference<R> {
    pub request: R,
    pub endpoint: Endpoint,
    pub timer: InferenceTimer,
}

#[async_trait]
impl<R: InferenceRequest> FromRequest<AppState> for ValidatedInference<R> {
    type Rejection = Error;

    async fn from_request(req: Request, state: &AppState) -> Result<Self, Self::Rejection> {
        let mut timer = InferenceTimer::start(state.metrics.clone());

        let request = match Json::<R>::from_request(req, state).await {
            Ok(Json(request)) => request,
            Err(rejection) => {
                timer.finish(Outcome::Invalid);
                return Err(Error::Binding(format!(
                    "{} request failed: {}",
                    R::KIND.label(),
                    rejection.body_text()
                )));
            }
        };

        let endpoint = match state.endpoints.resolve(request.model()) {
            Ok(endpoint) => endpoint,
            Err(err) => {
                timer.finish(Outcome::Invalid);
                return Err(err);
            }
        };

        timer.set_model(request.model());

        Ok(Self {
            request,
            endpoint,
            timer,
        })
    }
}
