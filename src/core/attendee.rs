use std::{collections::HashSet, fmt, path::{Path, PathBuf}, str::FromStr};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A registered person. Created once by the record factory and never mutated in place.
#[derive(PartialEq, Eq, Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttendeeRecord {
    /// Unique attendee ID
    pub id: String,
    pub full_name: String,
    pub contact_number: String,
    pub company_name: String,
    pub current_position: String,
    pub batch: String,
    #[serde(default)]
    pub student_id: String,
    pub email: String,
    /// Profile picture as a data URI, empty when none was supplied
    #[serde(default)]
    pub profile_picture: String,
    #[serde(default)]
    pub address: String,
    pub registration_date: DateTime<Utc>,
}

/// A single attendee field, named as it appears in the persisted blob.
#[derive(PartialEq, Eq, Hash, Debug, Clone, Copy, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AttendeeField {
    Id,
    FullName,
    ContactNumber,
    CompanyName,
    CurrentPosition,
    Batch,
    StudentId,
    Email,
    Address,
    RegistrationDate,
    ProfilePicture,
}

/// Admin table column: a field with its display header and default visibility.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ColumnConfig {
    pub field: AttendeeField,
    pub header_name: &'static str,
    pub selected: bool,
}

impl AttendeeField {
    pub const ALL: [AttendeeField; 11] = [
        AttendeeField::Id,
        AttendeeField::FullName,
        AttendeeField::ContactNumber,
        AttendeeField::CompanyName,
        AttendeeField::CurrentPosition,
        AttendeeField::Batch,
        AttendeeField::StudentId,
        AttendeeField::Email,
        AttendeeField::Address,
        AttendeeField::RegistrationDate,
        AttendeeField::ProfilePicture,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            AttendeeField::Id => "id",
            AttendeeField::FullName => "fullName",
            AttendeeField::ContactNumber => "contactNumber",
            AttendeeField::CompanyName => "companyName",
            AttendeeField::CurrentPosition => "currentPosition",
            AttendeeField::Batch => "batch",
            AttendeeField::StudentId => "studentId",
            AttendeeField::Email => "email",
            AttendeeField::Address => "address",
            AttendeeField::RegistrationDate => "registrationDate",
            AttendeeField::ProfilePicture => "profilePicture",
        }
    }

    pub fn header_name(&self) -> &'static str {
        match self {
            AttendeeField::Id => "ID",
            AttendeeField::FullName => "Full Name",
            AttendeeField::ContactNumber => "Contact Number",
            AttendeeField::CompanyName => "Company Name",
            AttendeeField::CurrentPosition => "Current Position",
            AttendeeField::Batch => "Batch",
            AttendeeField::StudentId => "Student ID",
            AttendeeField::Email => "Email",
            AttendeeField::Address => "Address",
            AttendeeField::RegistrationDate => "Registration Date",
            AttendeeField::ProfilePicture => "Profile",
        }
    }

    /// The admin table columns, in display order.
    pub fn columns() -> Vec<ColumnConfig> {
        AttendeeField::ALL
            .iter()
            .filter(|f| **f != AttendeeField::Id)
            .map(|f| ColumnConfig {
                field: *f,
                header_name: f.header_name(),
                selected: *f != AttendeeField::Address,
            })
            .collect()
    }
}

impl fmt::Display for AttendeeField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for AttendeeField {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        AttendeeField::ALL
            .iter()
            .find(|f| f.name().eq_ignore_ascii_case(s.trim()))
            .copied()
            .ok_or_else(|| format!("Unknown attendee field '{}'", s.trim()))
    }
}

/// Borrowed view of one field of a record.
#[derive(PartialEq, Debug, Clone, Copy)]
pub enum FieldValue<'a> {
    Text(&'a str),
    Date(DateTime<Utc>),
}

impl AttendeeRecord {
    pub fn field(&self, field: AttendeeField) -> FieldValue<'_> {
        match field {
            AttendeeField::Id => FieldValue::Text(&self.id),
            AttendeeField::FullName => FieldValue::Text(&self.full_name),
            AttendeeField::ContactNumber => FieldValue::Text(&self.contact_number),
            AttendeeField::CompanyName => FieldValue::Text(&self.company_name),
            AttendeeField::CurrentPosition => FieldValue::Text(&self.current_position),
            AttendeeField::Batch => FieldValue::Text(&self.batch),
            AttendeeField::StudentId => FieldValue::Text(&self.student_id),
            AttendeeField::Email => FieldValue::Text(&self.email),
            AttendeeField::Address => FieldValue::Text(&self.address),
            AttendeeField::RegistrationDate => FieldValue::Date(self.registration_date),
            AttendeeField::ProfilePicture => FieldValue::Text(&self.profile_picture),
        }
    }

    /// Case-insensitive match of the admin search box. An empty term matches everything.
    pub fn matches_search(&self, term: &str) -> bool {
        let term = term.trim().to_lowercase();
        if term.is_empty() {
            return true;
        }

        [
            &self.full_name,
            &self.email,
            &self.student_id,
            &self.batch,
            &self.contact_number,
        ]
        .iter()
        .any(|value| value.to_lowercase().contains(&term))
    }
}

/// Return the records matching a search term, keeping store order.
pub fn search<'a>(records: &'a [AttendeeRecord], term: Option<&str>) -> Vec<&'a AttendeeRecord> {
    match term {
        Some(term) => records.iter().filter(|r| r.matches_search(term)).collect(),
        None => records.iter().collect(),
    }
}

/// An ordered set of selected field names. Not persisted.
#[derive(PartialEq, Eq, Debug, Clone, Serialize)]
pub struct ColumnSelection(Vec<AttendeeField>);

impl ColumnSelection {
    /// Keeps the first occurrence of each field.
    pub fn new(fields: impl IntoIterator<Item = AttendeeField>) -> Self {
        let mut seen = HashSet::new();
        ColumnSelection(fields.into_iter().filter(|f| seen.insert(*f)).collect())
    }

    pub fn fields(&self) -> &[AttendeeField] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Parse a comma separated list such as `fullName,email`.
    pub fn parse(list: &str) -> Result<Self, String> {
        let fields = list
            .split(',')
            .filter(|s| !s.trim().is_empty())
            .map(AttendeeField::from_str)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(ColumnSelection::new(fields))
    }
}

impl Default for ColumnSelection {
    /// The columns the admin table shows before any toggling.
    fn default() -> Self {
        ColumnSelection::new(
            AttendeeField::columns()
                .into_iter()
                .filter(|c| c.selected)
                .map(|c| c.field),
        )
    }
}

/// Dashboard counters for the admin view.
#[derive(PartialEq, Eq, Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttendeeStats {
    pub registrations: usize,
    pub batches: usize,
    pub companies: usize,
    pub with_profile_pictures: usize,
}

impl AttendeeStats {
    pub fn from_records(records: &[AttendeeRecord]) -> Self {
        AttendeeStats {
            registrations: records.len(),
            batches: records.iter().map(|r| &r.batch).collect::<HashSet<_>>().len(),
            companies: records
                .iter()
                .map(|r| &r.company_name)
                .collect::<HashSet<_>>()
                .len(),
            with_profile_pictures: records
                .iter()
                .filter(|r| !r.profile_picture.is_empty())
                .count(),
        }
    }
}

/// Batch codes offered by the registration form, `011` through `076`.
pub fn batch_options() -> Vec<String> {
    (11..=76).map(|b| format!("{:03}", b)).collect()
}

/// Where the bytes of an uploaded image live until they are encoded.
#[derive(PartialEq, Eq, Debug, Clone)]
pub enum ImageSource {
    Bytes(Vec<u8>),
    File(PathBuf),
}

/// Raw profile picture attached to a registration form.
#[derive(PartialEq, Eq, Debug, Clone)]
pub struct ProfilePicture {
    /// Declared MIME type, e.g. `image/png`
    pub content_type: String,
    pub size: u64,
    pub source: ImageSource,
}

impl ProfilePicture {
    pub fn from_bytes(content_type: impl Into<String>, bytes: Vec<u8>) -> Self {
        ProfilePicture {
            content_type: content_type.into(),
            size: bytes.len() as u64,
            source: ImageSource::Bytes(bytes),
        }
    }

    /// Describe a file on disk. The MIME type comes from the extension.
    pub async fn from_path(path: &Path) -> std::io::Result<Self> {
        let metadata = tokio::fs::metadata(path).await?;
        Ok(ProfilePicture {
            content_type: mime_from_extension(path).to_owned(),
            size: metadata.len(),
            source: ImageSource::File(path.to_path_buf()),
        })
    }
}

fn mime_from_extension(path: &Path) -> &'static str {
    match path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_lowercase)
        .as_deref()
    {
        Some("jpg" | "jpeg") => "image/jpeg",
        Some("png") => "image/png",
        Some("gif") => "image/gif",
        Some("webp") => "image/webp",
        Some("bmp") => "image/bmp",
        _ => "application/octet-stream",
    }
}

/// Validated, trimmed form input that has not been assigned an identity yet.
#[derive(PartialEq, Eq, Debug, Clone)]
pub struct RegistrationDraft {
    pub full_name: String,
    pub contact_number: String,
    pub company_name: String,
    pub current_position: String,
    pub batch: String,
    pub student_id: String,
    pub email: String,
    pub address: String,
    pub profile_picture: Option<ProfilePicture>,
}
