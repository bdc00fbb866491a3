use std::sync::Arc;

use base64::Engine as _;
use chrono::Utc;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::error::{Error, Result};

use super::{
    attendee::{AttendeeRecord, ImageSource, ProfilePicture, RegistrationDraft},
    db::RecordStore,
};

/// Read an uploaded picture and encode it as a self-contained data URI.
///
/// The bytes must carry a recognisable image signature.
pub async fn encode_profile_picture(picture: &ProfilePicture) -> Result<String> {
    let bytes = match &picture.source {
        ImageSource::Bytes(bytes) => bytes.clone(),
        ImageSource::File(path) => tokio::fs::read(path).await.map_err(|e| {
            Error::Encoding(format!("Failed to read {}: {}", path.display(), e))
        })?,
    };

    let format = image::guess_format(&bytes)
        .map_err(|e| Error::Encoding(format!("Unreadable image: {}", e)))?;

    // Prefer the declared type, as a browser file reader does; fall back to the sniffed one.
    let mime = if picture.content_type.starts_with("image/") {
        picture.content_type.as_str()
    } else {
        sniffed_mime(format)
    };

    let encoded = base64::engine::general_purpose::STANDARD.encode(&bytes);
    Ok(format!("data:{};base64,{}", mime, encoded))
}

fn sniffed_mime(format: image::ImageFormat) -> &'static str {
    match format {
        image::ImageFormat::Png => "image/png",
        image::ImageFormat::Jpeg => "image/jpeg",
        image::ImageFormat::Gif => "image/gif",
        image::ImageFormat::WebP => "image/webp",
        image::ImageFormat::Bmp => "image/bmp",
        _ => "application/octet-stream",
    }
}

/// Turns validated drafts into stored attendee records.
pub struct RecordFactory {
    store: Arc<dyn RecordStore>,
    /// Serialises the load-append-save sequence between tasks of this process.
    write_lock: Mutex<()>,
}

impl RecordFactory {
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        RecordFactory {
            store,
            write_lock: Mutex::new(()),
        }
    }

    pub fn store(&self) -> &Arc<dyn RecordStore> {
        &self.store
    }

    /// Create and persist a record. Nothing is written if the picture cannot be encoded.
    pub async fn create(&self, draft: RegistrationDraft) -> Result<AttendeeRecord> {
        let profile_picture = match &draft.profile_picture {
            Some(picture) => encode_profile_picture(picture).await?,
            None => String::new(),
        };

        let _guard = self.write_lock.lock().await;

        let record = AttendeeRecord {
            id: Uuid::new_v4().to_string(),
            full_name: draft.full_name,
            contact_number: draft.contact_number,
            company_name: draft.company_name,
            current_position: draft.current_position,
            batch: draft.batch,
            student_id: draft.student_id,
            email: draft.email,
            profile_picture,
            address: draft.address,
            registration_date: Utc::now(),
        };

        let mut attendees = self.store.load().await?;
        attendees.push(record.clone());
        self.store.save(&attendees).await?;

        log::info!("Registered attendee {} ({})", record.full_name, record.id);
        Ok(record)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::{collections::HashSet, io::Cursor};

    use super::*;
    use crate::core::{
        db::{MemoryStore, SqliteStore},
        intake::{tests::valid_form, validate, IntakeRules},
    };

    /// A small valid PNG.
    pub fn png_bytes() -> Vec<u8> {
        let img = image::RgbImage::from_fn(24, 24, |x, y| image::Rgb([x as u8 * 10, y as u8 * 10, 128]));
        let mut bytes = Cursor::new(Vec::new());
        image::DynamicImage::ImageRgb8(img)
            .write_to(&mut bytes, image::ImageFormat::Png)
            .unwrap();
        bytes.into_inner()
    }

    fn draft_with_png() -> RegistrationDraft {
        let picture = ProfilePicture::from_bytes("image/png", png_bytes());
        validate(&valid_form(), Some(picture), &IntakeRules::default()).unwrap()
    }

    #[tokio::test]
    async fn test_create_appends_one_record() {
        let store = Arc::new(MemoryStore::default());
        let factory = RecordFactory::new(store.clone());

        let before = Utc::now();
        let record = factory.create(draft_with_png()).await.unwrap();
        let after = Utc::now();

        let stored = store.load().await.unwrap();
        assert_eq!(stored, vec![record.clone()]);
        assert!(!record.id.is_empty());
        assert_eq!(record.full_name, "Jane Doe");
        assert_eq!(record.email, "jane@x.com");
        assert_eq!(record.student_id, "08514");
        assert_eq!(record.address, "");
        assert!(record.profile_picture.starts_with("data:image/png;base64,"));
        assert!(record.registration_date >= before && record.registration_date <= after);
    }

    #[tokio::test]
    async fn test_ids_unique_and_dates_ordered() {
        let store = Arc::new(SqliteStore::in_memory().await.unwrap());
        let factory = RecordFactory::new(store.clone());

        for _ in 0..5 {
            let draft = validate(
                &valid_form(),
                None,
                &IntakeRules {
                    require_profile_picture: false,
                    ..IntakeRules::default()
                },
            )
            .unwrap();
            factory.create(draft).await.unwrap();
        }

        let stored = store.load().await.unwrap();
        assert_eq!(stored.len(), 5);
        assert_eq!(stored.iter().map(|r| &r.id).collect::<HashSet<_>>().len(), 5);
        assert!(stored
            .windows(2)
            .all(|w| w[0].registration_date <= w[1].registration_date));
        assert!(stored.iter().all(|r| r.profile_picture.is_empty()));
    }

    #[tokio::test]
    async fn test_concurrent_creates_are_not_lost() {
        let store = Arc::new(MemoryStore::default());
        let factory = Arc::new(RecordFactory::new(store.clone()));

        let mut tasks = tokio::task::JoinSet::new();
        for _ in 0..8 {
            let factory = factory.clone();
            tasks.spawn(async move { factory.create(draft_with_png()).await });
        }
        while let Some(res) = tasks.join_next().await {
            res.unwrap().unwrap();
        }

        assert_eq!(store.load().await.unwrap().len(), 8);
    }

    #[tokio::test]
    async fn test_unreadable_image_persists_nothing() {
        let store = Arc::new(MemoryStore::default());
        let factory = RecordFactory::new(store.clone());

        let mut draft = draft_with_png();
        draft.profile_picture = Some(ProfilePicture::from_bytes("image/png", b"not an image".to_vec()));
        assert!(matches!(factory.create(draft).await, Err(Error::Encoding(_))));

        let mut draft = draft_with_png();
        draft.profile_picture = Some(ProfilePicture {
            content_type: "image/png".to_owned(),
            size: 10,
            source: ImageSource::File("/nonexistent/picture.png".into()),
        });
        assert!(matches!(factory.create(draft).await, Err(Error::Encoding(_))));

        assert!(store.blob().await.is_none());
    }

    #[tokio::test]
    async fn test_encode_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("me.png");
        std::fs::write(&path, png_bytes()).unwrap();

        let picture = ProfilePicture::from_path(&path).await.unwrap();
        let uri = encode_profile_picture(&picture).await.unwrap();
        let payload = uri.strip_prefix("data:image/png;base64,").unwrap();
        assert_eq!(
            base64::engine::general_purpose::STANDARD.decode(payload).unwrap(),
            png_bytes()
        );
    }
}
