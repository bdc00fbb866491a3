use std::{convert::Infallible, sync::Arc};

use warp::{reject::Rejection, Filter};

use crate::core::{factory::RecordFactory, settings::Settings};

use super::handlers::{
    export_attendees, get_batches, get_columns, get_confirmation, get_qr_payload, get_stats,
    get_ticket_pdf, get_ticket_png, get_ticket_svg, list_attendees, register, ExportQuery,
    SearchQuery,
};

/// Headroom over the picture limit for the text parts of a registration.
const FORM_OVERHEAD_BYTES: u64 = 64 * 1024;
/// Uploads up to this multiple of the picture limit reach the validator, so an
/// oversized picture is reported alongside every other field error.
const UPLOAD_LIMIT_FACTOR: u64 = 4;

fn register_body_limit(settings: &Settings) -> u64 {
    settings
        .max_profile_picture_bytes()
        .saturating_mul(UPLOAD_LIMIT_FACTOR)
        .saturating_add(FORM_OVERHEAD_BYTES)
}

pub fn with_factory(
    factory: Arc<RecordFactory>,
) -> impl Filter<Extract = (Arc<RecordFactory>,), Error = Infallible> + Clone {
    warp::any().map(move || factory.clone())
}

pub fn with_settings(
    settings: Arc<Settings>,
) -> impl Filter<Extract = (Arc<Settings>,), Error = Infallible> + Clone {
    warp::any().map(move || settings.clone())
}

fn attendee_filters(
    factory: Arc<RecordFactory>,
    settings: Arc<Settings>,
) -> impl Filter<Extract = (impl warp::Reply,), Error = Rejection> + Clone {
    let register = warp::path!("api" / "register")
        .and(warp::post())
        .and(warp::multipart::form().max_length(register_body_limit(&settings)))
        .and(with_factory(factory.clone()))
        .and(with_settings(settings.clone()))
        .and_then(register);

    let list = warp::path!("api" / "attendees")
        .and(warp::get())
        .and(warp::query::<SearchQuery>())
        .and(with_factory(factory.clone()))
        .and_then(list_attendees);

    let stats = warp::path!("api" / "attendees" / "stats")
        .and(warp::get())
        .and(with_factory(factory.clone()))
        .and_then(get_stats);

    let confirmation = warp::path!("api" / "confirmation" / String)
        .and(warp::get())
        .and(with_factory(factory.clone()))
        .and_then(get_confirmation);

    let export = warp::path!("api" / "export")
        .and(warp::get())
        .and(warp::query::<ExportQuery>())
        .and(with_factory(factory))
        .and(with_settings(settings))
        .and_then(export_attendees);

    register.or(list).or(stats).or(confirmation).or(export)
}

fn ticket_filters(
    factory: Arc<RecordFactory>,
    settings: Arc<Settings>,
) -> impl Filter<Extract = (impl warp::Reply,), Error = Rejection> + Clone {
    let qr = warp::path!("api" / "tickets" / String / "qr")
        .and(warp::get())
        .and(with_factory(factory.clone()))
        .and_then(get_qr_payload);

    let svg = warp::path!("api" / "tickets" / String / "ticket.svg")
        .and(warp::get())
        .and(with_factory(factory.clone()))
        .and_then(get_ticket_svg);

    let png = warp::path!("api" / "tickets" / String / "ticket.png")
        .and(warp::get())
        .and(with_factory(factory.clone()))
        .and(with_settings(settings.clone()))
        .and_then(get_ticket_png);

    let pdf = warp::path!("api" / "tickets" / String / "ticket.pdf")
        .and(warp::get())
        .and(with_factory(factory))
        .and(with_settings(settings))
        .and_then(get_ticket_pdf);

    qr.or(svg).or(png).or(pdf)
}

pub fn api_filters(
    factory: Arc<RecordFactory>,
    settings: Arc<Settings>,
) -> impl Filter<Extract = (impl warp::Reply,), Error = Rejection> + Clone {
    let columns = warp::path!("api" / "columns")
        .and(warp::get())
        .and_then(get_columns);

    let batches = warp::path!("api" / "batches")
        .and(warp::get())
        .and_then(get_batches);

    columns
        .or(batches)
        .or(attendee_filters(factory.clone(), settings.clone()))
        .or(ticket_filters(factory, settings))
}

#[cfg(test)]
mod tests {
    use serde_json::Value;
    use warp::http::StatusCode;

    use super::*;
    use crate::core::{
        attendee::{tests::sample_record, AttendeeRecord},
        db::{encode_records, MemoryStore, RecordStore},
        export::XLSX_CONTENT_TYPE,
        factory::tests::png_bytes,
        ticket::TicketPayload,
    };

    const BOUNDARY: &str = "tea-gathering-boundary";

    fn seeded(records: &[AttendeeRecord]) -> (Arc<MemoryStore>, Arc<RecordFactory>) {
        let store = Arc::new(MemoryStore::with_blob(encode_records(records).unwrap()));
        let factory = Arc::new(RecordFactory::new(store.clone()));
        (store, factory)
    }

    fn filters(
        factory: Arc<RecordFactory>,
    ) -> impl Filter<Extract = (impl warp::Reply,), Error = Rejection> + Clone + 'static {
        api_filters(factory, Arc::new(Settings::default()))
    }

    fn multipart_body(fields: &[(&str, &str)], picture: Option<&[u8]>) -> Vec<u8> {
        let mut body = Vec::new();
        for (name, value) in fields {
            body.extend_from_slice(
                format!(
                    "--{}\r\nContent-Disposition: form-data; name=\"{}\"\r\n\r\n{}\r\n",
                    BOUNDARY, name, value
                )
                .as_bytes(),
            );
        }
        if let Some(bytes) = picture {
            body.extend_from_slice(
                format!(
                    "--{}\r\nContent-Disposition: form-data; name=\"profilePicture\"; filename=\"me.png\"\r\nContent-Type: image/png\r\n\r\n",
                    BOUNDARY
                )
                .as_bytes(),
            );
            body.extend_from_slice(bytes);
            body.extend_from_slice(b"\r\n");
        }
        body.extend_from_slice(format!("--{}--\r\n", BOUNDARY).as_bytes());
        body
    }

    fn registration_fields() -> Vec<(&'static str, &'static str)> {
        vec![
            ("fullName", "Jane Doe"),
            ("contactNumber", "+8801111111111"),
            ("companyName", "Acme"),
            ("currentPosition", "Engineer"),
            ("batch", "033"),
            ("studentId", "08514"),
            ("email", "jane@x.com"),
        ]
    }

    async fn post_registration(
        factory: Arc<RecordFactory>,
        body: Vec<u8>,
    ) -> warp::http::Response<bytes::Bytes> {
        warp::test::request()
            .method("POST")
            .path("/api/register")
            .header(
                "content-type",
                format!("multipart/form-data; boundary={}", BOUNDARY),
            )
            .body(body)
            .reply(&filters(factory))
            .await
    }

    fn json(body: &[u8]) -> Value {
        serde_json::from_slice(body).unwrap()
    }

    #[tokio::test]
    async fn test_register_creates_record() {
        let (store, factory) = seeded(&[]);
        let body = multipart_body(&registration_fields(), Some(&png_bytes()));

        let res = post_registration(factory.clone(), body).await;
        assert_eq!(res.status(), StatusCode::CREATED);

        let created = json(res.body());
        assert_eq!(created["fullName"], "Jane Doe");
        assert!(created["profilePicture"]
            .as_str()
            .unwrap()
            .starts_with("data:image/png;base64,"));

        let records = store.load().await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(created["id"], records[0].id.as_str());

        let res = warp::test::request()
            .path("/api/attendees")
            .reply(&filters(factory))
            .await;
        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(json(res.body()).as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_register_reports_every_field_error() {
        let (store, factory) = seeded(&[]);
        let body = multipart_body(&[("email", "not-an-email"), ("studentId", "12a")], None);

        let res = post_registration(factory, body).await;
        assert_eq!(res.status(), StatusCode::UNPROCESSABLE_ENTITY);

        let errors = json(res.body());
        assert_eq!(errors["fullName"], "Full name is required");
        assert_eq!(errors["email"], "Please enter a valid email address");
        assert_eq!(errors["studentId"], "Please enter a valid student ID (numbers only)");
        assert_eq!(errors["profilePicture"], "Profile picture is required");
        assert!(store.load().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_register_rejects_non_image() {
        let (store, factory) = seeded(&[]);
        let body = multipart_body(&registration_fields(), Some(b"definitely not a picture"));

        let res = post_registration(factory, body).await;
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);
        assert!(store.load().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_register_oversized_picture_reports_field_errors() {
        let (store, factory) = seeded(&[]);
        let picture = vec![0u8; 3 * 1024 * 1024];
        let body = multipart_body(&[("email", "bad")], Some(&picture));

        let res = post_registration(factory, body).await;
        assert_eq!(res.status(), StatusCode::UNPROCESSABLE_ENTITY);

        let errors = json(res.body());
        assert_eq!(errors["profilePicture"], "Image size should be less than 2MB");
        assert_eq!(errors["email"], "Please enter a valid email address");
        assert_eq!(errors["fullName"], "Full name is required");
        assert!(store.load().await.unwrap().is_empty());
    }

    #[test]
    fn test_register_body_limit() {
        let settings = Settings::default();
        assert!(register_body_limit(&settings) > 3 * settings.max_profile_picture_bytes());

        let unbounded = Settings {
            max_profile_picture_bytes: Some(u64::MAX),
            ..Settings::default()
        };
        assert_eq!(register_body_limit(&unbounded), u64::MAX);
    }

    #[tokio::test]
    async fn test_search_and_stats() {
        let (_, factory) = seeded(&[
            sample_record("a1", "Jane Doe", "033"),
            sample_record("b2", "John Smith", "045"),
        ]);

        let res = warp::test::request()
            .path("/api/attendees?search=smith")
            .reply(&filters(factory.clone()))
            .await;
        let found = json(res.body());
        assert_eq!(found.as_array().unwrap().len(), 1);
        assert_eq!(found[0]["id"], "b2");

        let res = warp::test::request()
            .path("/api/attendees/stats")
            .reply(&filters(factory))
            .await;
        let stats = json(res.body());
        assert_eq!(stats["registrations"], 2);
        assert_eq!(stats["batches"], 2);
    }

    #[tokio::test]
    async fn test_confirmation() {
        let record = sample_record("0f8fad5b-d9cb-469f-a165-70867728950e", "Jane Doe", "033");
        let (_, factory) = seeded(&[record.clone()]);

        let res = warp::test::request()
            .path(&format!("/api/confirmation/{}", record.id))
            .reply(&filters(factory.clone()))
            .await;
        assert_eq!(res.status(), StatusCode::OK);
        let confirmation = json(res.body());
        assert_eq!(confirmation["ticketNumber"], "TG-2025-0F8FAD5B");
        assert_eq!(confirmation["attendee"]["fullName"], "Jane Doe");
        assert_eq!(confirmation["qrPayload"]["studentId"], "08514");

        let res = warp::test::request()
            .path("/api/confirmation/missing")
            .reply(&filters(factory))
            .await;
        assert_eq!(res.status(), StatusCode::NOT_FOUND);
        assert_eq!(json(res.body())["error"], "Registration not found");
    }

    #[tokio::test]
    async fn test_ticket_artifacts() {
        let record = sample_record("c3", "Jane Doe", "033");
        let (_, factory) = seeded(&[record.clone()]);

        let res = warp::test::request()
            .path("/api/tickets/c3/qr")
            .reply(&filters(factory.clone()))
            .await;
        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(
            res.body().as_ref(),
            TicketPayload::from_record(&record).encode().unwrap().as_bytes()
        );

        let res = warp::test::request()
            .path("/api/tickets/c3/ticket.svg")
            .reply(&filters(factory.clone()))
            .await;
        assert_eq!(res.headers()["content-type"], "image/svg+xml");
        assert!(String::from_utf8_lossy(res.body()).contains("Jane Doe"));

        let res = warp::test::request()
            .path("/api/tickets/c3/ticket.pdf")
            .reply(&filters(factory.clone()))
            .await;
        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(
            res.headers()["content-disposition"],
            "attachment; filename=\"tea-gathering-ticket-08514.pdf\""
        );
        assert!(res.body().starts_with(b"%PDF-"));

        let res = warp::test::request()
            .path("/api/tickets/nobody/ticket.png")
            .reply(&filters(factory))
            .await;
        assert_eq!(res.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_export() {
        let (_, factory) = seeded(&[
            sample_record("a1", "Jane Doe", "033"),
            sample_record("b2", "John Smith", "045"),
        ]);

        let res = warp::test::request()
            .path("/api/export?fields=fullName,email&search=jane")
            .reply(&filters(factory.clone()))
            .await;
        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(res.headers()["content-type"], XLSX_CONTENT_TYPE);
        assert!(res.body().starts_with(b"PK"));

        let res = warp::test::request()
            .path("/api/export?fields=fullName,nickname")
            .reply(&filters(factory))
            .await;
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_reference_data() {
        let (_, factory) = seeded(&[]);

        let res = warp::test::request()
            .path("/api/batches")
            .reply(&filters(factory.clone()))
            .await;
        let batches = json(res.body());
        assert_eq!(batches.as_array().unwrap().len(), 66);
        assert_eq!(batches[0], "011");

        let res = warp::test::request()
            .path("/api/columns")
            .reply(&filters(factory))
            .await;
        let columns = json(res.body());
        assert!(columns
            .as_array()
            .unwrap()
            .iter()
            .any(|c| c["field"] == "address" && c["selected"] == false));
    }
}
