use crate::{server::SharedState, stream::VideoStreamError, stream::FRAME_BOUNDARY};
use axum::{
    body::Body,
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
};
use tracing::instrument;

#[instrument(skip(state))]
pub async fn video_feed(State(state): State<SharedState>) -> Result<Response, VideoStreamError> {
    state.metrics.record_request("/video_feed");
    let stream = state.video_stream.generate_stream();

    let body = Body::from_stream(stream);

    let response = Response::builder()
        .header(
            header::CONTENT_TYPE,
            format!("multipart/x-mixed-replace; boundary={}", FRAME_BOUNDARY),
        )
        .header(header::CACHE_CONTROL, "no-cache")
        .body(body)
        .map_err(|e| VideoStreamError::HttpBuilderError(e.to_string()))?;

    Ok(response)
}

impl IntoResponse for VideoStreamError {
    fn into_response(self) -> Response {
        let status = match self {
            VideoStreamError::Camera(_) => StatusCode::SERVICE_UNAVAILABLE,
            VideoStreamError::Encode(_) | VideoStreamError::HttpBuilderError(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        (status, self.to_string()).into_response()
    }
}

#[cfg(test)]
mod tests {
    use crate::{hand_state::HandState, prediction::tests::MockInference, routes::api_routes};
    use axum::{
        body::Body,
        http::{header, Request, StatusCode},
    };
    use futures::StreamExt;
    use std::sync::Arc;
    use tower::util::ServiceExt;

    #[tokio::test]
    async fn test_video_feed_streams_jpeg_parts() {
        let state = crate::routes::test_support::shared_state(
            Arc::new(MockInference::default()),
            Arc::new(HandState::new()),
        );
        let app = api_routes().with_state(state);

        let response = app
            .oneshot(Request::builder().uri("/video_feed").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()[header::CONTENT_TYPE],
            "multipart/x-mixed-replace; boundary=frame"
        );

        let mut body = response.into_body().into_data_stream();
        let first = body.next().await.unwrap().unwrap();
        assert!(first.starts_with(b"--frame\r\nContent-Type: image/jpeg\r\n"));
    }
}
