use std::{convert::Infallible, sync::Arc};

use filters::api_filters;
use handlers::ErrorBody;
use warp::{http::Method, reject::Rejection, Filter};

use crate::core::{factory::RecordFactory, settings::Settings};

pub mod filters;
pub mod handlers;

async fn handle_rejection(err: Rejection) -> Result<impl warp::Reply, Infallible> {
    let (code, msg) = if err.is_not_found() {
        (warp::http::StatusCode::NOT_FOUND, "Not Found".to_string())
    } else if let Some(err) = err.find::<warp::reject::PayloadTooLarge>() {
        log::warn!("{}", err);
        (warp::http::StatusCode::PAYLOAD_TOO_LARGE, err.to_string())
    } else if let Some(err) = err.find::<warp::reject::MethodNotAllowed>() {
        log::error!("Method Not Allowed: {}", err);
        (warp::http::StatusCode::METHOD_NOT_ALLOWED, err.to_string())
    } else if let Some(err) = err.find::<warp::reject::InvalidQuery>() {
        log::error!("Invalid Query: {}", err);
        (warp::http::StatusCode::BAD_REQUEST, err.to_string())
    } else if let Some(err) = err.find::<warp::reject::InvalidHeader>() {
        log::error!("Invalid Header: {}", err);
        (warp::http::StatusCode::BAD_REQUEST, err.to_string())
    } else {
        log::error!("Unhandled Rejection: {:?}", err);
        (
            warp::http::StatusCode::INTERNAL_SERVER_ERROR,
            "Internal Server Error".to_string(),
        )
    };

    Ok(warp::reply::with_status(
        warp::reply::json(&ErrorBody { error: msg }),
        code,
    ))
}

pub async fn run_http_server(
    factory: Arc<RecordFactory>,
    settings: Arc<Settings>,
) -> anyhow::Result<()> {
    let cors = warp::cors()
        .allow_any_origin()
        .allow_headers(vec![
            "User-Agent",
            "Sec-Fetch-Mode",
            "Referer",
            "Origin",
            "Content-Type",
            "Access-Control-Allow-Origin",
            "Access-Control-Request-Method",
            "Access-Control-Request-Headers",
            "Access-Control-Allow-Headers",
        ])
        .allow_methods(&[Method::GET, Method::POST, Method::OPTIONS])
        .expose_headers(vec!["Content-Disposition"]);

    let port = settings.web_port();
    let routes = api_filters(factory, settings)
        .with(warp::log("tea_gathering::web"))
        .recover(handle_rejection);

    log::info!("Serving registrations on port {}", port);
    warp::serve(routes.with(cors))
        .run(([0, 0, 0, 0], port))
        .await;

    Ok(())
}
