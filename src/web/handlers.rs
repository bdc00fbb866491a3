use std::{convert::Infallible, str::FromStr, sync::Arc};

use bytes::BufMut;
use futures::TryStreamExt;
use serde::{Deserialize, Serialize};
use warp::{
    http::{header, Response, StatusCode},
    multipart::{FormData, Part},
    reply::Reply,
};

use crate::{
    core::{
        attendee::{
            batch_options, search, AttendeeField, AttendeeRecord, AttendeeStats, ColumnSelection,
            ProfilePicture,
        },
        db::find_attendee,
        export::generate_export,
        factory::RecordFactory,
        intake::{validate, IntakeRules, RegistrationForm},
        settings::Settings,
        ticket::{
            generate_ticket_document, generate_ticket_png, render_ticket_visual, ticket_number,
            TicketPayload,
        },
        Download,
    },
    error::{Error, Result},
};

/// Query of the attendee list.
#[derive(Serialize, Deserialize, Debug, Default)]
pub struct SearchQuery {
    pub search: Option<String>,
}

/// Query of the spreadsheet export. `fields` is a comma separated list of field names.
#[derive(Serialize, Deserialize, Debug, Default)]
pub struct ExportQuery {
    pub fields: Option<String>,
    pub search: Option<String>,
}

/// Everything the confirmation view shows for one registration.
#[derive(Serialize, Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct Confirmation {
    pub attendee: AttendeeRecord,
    pub ticket_number: String,
    pub qr_payload: TicketPayload,
}

/// Json body for every error that is not a validation failure.
#[derive(Serialize, Deserialize, Debug)]
pub struct ErrorBody {
    pub error: String,
}

pub fn error_reply(e: &Error) -> warp::reply::Response {
    let status = e.status();
    if status.is_server_error() {
        log::error!("{}", e);
    } else {
        log::warn!("{}", e);
    }

    match e {
        Error::Validation(errors) => {
            warp::reply::with_status(warp::reply::json(errors), status).into_response()
        }
        e => warp::reply::with_status(
            warp::reply::json(&ErrorBody {
                error: e.to_string(),
            }),
            status,
        )
        .into_response(),
    }
}

pub fn to_http_output<T: Serialize>(
    result: Result<T>,
    status: StatusCode,
) -> std::result::Result<warp::reply::Response, Infallible> {
    Ok(match result {
        Ok(data) => warp::reply::with_status(warp::reply::json(&data), status).into_response(),
        Err(e) => error_reply(&e),
    })
}

fn to_http_body(
    result: Result<(Vec<u8>, &'static str)>,
) -> std::result::Result<warp::reply::Response, Infallible> {
    Ok(match result {
        Ok((bytes, content_type)) => Response::builder()
            .header(header::CONTENT_TYPE, content_type)
            .body(bytes)
            .map(Reply::into_response)
            .unwrap_or_else(|e| error_reply(&Error::artifact("response", e))),
        Err(e) => error_reply(&e),
    })
}

pub fn to_http_download(
    result: Result<Download>,
) -> std::result::Result<warp::reply::Response, Infallible> {
    Ok(match result {
        Ok(download) => Response::builder()
            .header(header::CONTENT_TYPE, download.content_type)
            .header(
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}\"", download.file_name),
            )
            .body(download.bytes)
            .map(Reply::into_response)
            .unwrap_or_else(|e| error_reply(&Error::artifact("download", e))),
        Err(e) => error_reply(&e),
    })
}

/// Collect the multipart registration into form text fields and an optional picture.
///
/// Empty file parts count as no upload. Unknown part names are ignored.
async fn read_registration(form: FormData) -> Result<(RegistrationForm, Option<ProfilePicture>)> {
    let parts: Vec<Part> = form
        .try_collect()
        .await
        .map_err(|e| Error::Encoding(e.to_string()))?;

    let mut registration = RegistrationForm::default();
    let mut picture = None;

    for part in parts {
        let name = part.name().to_owned();
        let content_type = part
            .content_type()
            .unwrap_or("application/octet-stream")
            .to_owned();
        let value = part
            .stream()
            .try_fold(Vec::new(), |mut acc, buf| async move {
                acc.put(buf);
                Ok(acc)
            })
            .await
            .map_err(|e| Error::Encoding(e.to_string()))?;

        match AttendeeField::from_str(&name) {
            Ok(AttendeeField::ProfilePicture) => {
                if !value.is_empty() {
                    picture = Some(ProfilePicture::from_bytes(content_type, value));
                }
            }
            Ok(field) => {
                let text = String::from_utf8_lossy(&value).into_owned();
                if !registration.set(field, text) {
                    log::debug!("Ignoring form part {}", name);
                }
            }
            Err(_) => log::debug!("Ignoring form part {}", name),
        }
    }

    Ok((registration, picture))
}

pub async fn register(
    form: FormData,
    factory: Arc<RecordFactory>,
    settings: Arc<Settings>,
) -> std::result::Result<warp::reply::Response, Infallible> {
    let result = async {
        let (registration, picture) = read_registration(form).await?;
        let draft = validate(&registration, picture, &IntakeRules::from_settings(&settings))?;
        factory.create(draft).await
    }
    .await;

    to_http_output(result, StatusCode::CREATED)
}

pub async fn list_attendees(
    query: SearchQuery,
    factory: Arc<RecordFactory>,
) -> std::result::Result<warp::reply::Response, Infallible> {
    let result = factory.store().load().await.map(|records| {
        search(&records, query.search.as_deref())
            .into_iter()
            .cloned()
            .collect::<Vec<_>>()
    });
    to_http_output(result, StatusCode::OK)
}

pub async fn get_stats(
    factory: Arc<RecordFactory>,
) -> std::result::Result<warp::reply::Response, Infallible> {
    let result = factory
        .store()
        .load()
        .await
        .map(|records| AttendeeStats::from_records(&records));
    to_http_output(result, StatusCode::OK)
}

pub async fn get_columns() -> std::result::Result<warp::reply::Response, Infallible> {
    to_http_output(Ok(AttendeeField::columns()), StatusCode::OK)
}

pub async fn get_batches() -> std::result::Result<warp::reply::Response, Infallible> {
    to_http_output(Ok(batch_options()), StatusCode::OK)
}

pub async fn get_confirmation(
    id: String,
    factory: Arc<RecordFactory>,
) -> std::result::Result<warp::reply::Response, Infallible> {
    let result = find_attendee(factory.store().as_ref(), &id)
        .await
        .map(|attendee| Confirmation {
            ticket_number: ticket_number(&attendee.id),
            qr_payload: TicketPayload::from_record(&attendee),
            attendee,
        });
    to_http_output(result, StatusCode::OK)
}

pub async fn get_qr_payload(
    id: String,
    factory: Arc<RecordFactory>,
) -> std::result::Result<warp::reply::Response, Infallible> {
    let result = async {
        let record = find_attendee(factory.store().as_ref(), &id).await?;
        let payload = TicketPayload::from_record(&record).encode()?;
        Ok::<_, Error>((payload.into_bytes(), "application/json"))
    }
    .await;
    to_http_body(result)
}

pub async fn get_ticket_svg(
    id: String,
    factory: Arc<RecordFactory>,
) -> std::result::Result<warp::reply::Response, Infallible> {
    let result = async {
        let record = find_attendee(factory.store().as_ref(), &id).await?;
        let visual = render_ticket_visual(&record, &TicketPayload::from_record(&record))?;
        Ok::<_, Error>((visual.to_svg().into_bytes(), "image/svg+xml"))
    }
    .await;
    to_http_body(result)
}

pub async fn get_ticket_png(
    id: String,
    factory: Arc<RecordFactory>,
    settings: Arc<Settings>,
) -> std::result::Result<warp::reply::Response, Infallible> {
    let result = async {
        let record = find_attendee(factory.store().as_ref(), &id).await?;
        let bytes = generate_ticket_png(&record, settings.ticket_pixel_ratio()).await?;
        Ok::<_, Error>((bytes, "image/png"))
    }
    .await;
    to_http_body(result)
}

pub async fn get_ticket_pdf(
    id: String,
    factory: Arc<RecordFactory>,
    settings: Arc<Settings>,
) -> std::result::Result<warp::reply::Response, Infallible> {
    let result = async {
        let record = find_attendee(factory.store().as_ref(), &id).await?;
        generate_ticket_document(
            &record,
            settings.ticket_pixel_ratio(),
            settings.contact_email(),
        )
        .await
    }
    .await;
    to_http_download(result)
}

pub async fn export_attendees(
    query: ExportQuery,
    factory: Arc<RecordFactory>,
    settings: Arc<Settings>,
) -> std::result::Result<warp::reply::Response, Infallible> {
    let selection = match query.fields.as_deref() {
        Some(fields) => match ColumnSelection::parse(fields) {
            Ok(selection) => selection,
            Err(e) => {
                return Ok(warp::reply::with_status(
                    warp::reply::json(&ErrorBody { error: e }),
                    StatusCode::BAD_REQUEST,
                )
                .into_response())
            }
        },
        None => ColumnSelection::default(),
    };

    let result = async {
        let records = factory.store().load().await?;
        let matching = search(&records, query.search.as_deref())
            .into_iter()
            .cloned()
            .collect();
        generate_export(matching, selection, settings.date_format().to_owned()).await
    }
    .await;
    to_http_download(result)
}
