use std::{collections::BTreeMap, fmt, sync::OnceLock};

use regex::Regex;
use serde::{Deserialize, Serialize};

use super::attendee::{AttendeeField, ProfilePicture, RegistrationDraft};
use super::settings::Settings;

static CONTACT_NUMBER_REGEX: OnceLock<Regex> = OnceLock::new();
static EMAIL_REGEX: OnceLock<Regex> = OnceLock::new();
static STUDENT_ID_REGEX: OnceLock<Regex> = OnceLock::new();

fn contact_number_regex() -> &'static Regex {
    CONTACT_NUMBER_REGEX.get_or_init(|| Regex::new(r"^[0-9+-]+$").unwrap())
}

fn email_regex() -> &'static Regex {
    EMAIL_REGEX.get_or_init(|| Regex::new(r"(?i)^[A-Z0-9._%+-]+@[A-Z0-9.-]+\.[A-Z]{2,}$").unwrap())
}

fn student_id_regex() -> &'static Regex {
    STUDENT_ID_REGEX.get_or_init(|| Regex::new(r"^[0-9]+$").unwrap())
}

// Name, batch and student ID are embedded in the ticket QR code; together
// they must stay within one version 40-H code even when every character
// needs a six byte json escape.
pub const MAX_FULL_NAME_CHARS: usize = 100;
pub const MAX_BATCH_CHARS: usize = 10;
pub const MAX_STUDENT_ID_CHARS: usize = 20;
pub const MAX_CONTACT_NUMBER_CHARS: usize = 20;
pub const MAX_EMAIL_CHARS: usize = 254;
pub const MAX_COMPANY_NAME_CHARS: usize = 100;
pub const MAX_CURRENT_POSITION_CHARS: usize = 100;
pub const MAX_ADDRESS_CHARS: usize = 300;

/// Raw registration form as submitted, before any checks.
#[derive(PartialEq, Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RegistrationForm {
    pub full_name: String,
    pub contact_number: String,
    pub company_name: String,
    pub current_position: String,
    pub batch: String,
    pub student_id: String,
    pub email: String,
    pub address: String,
}

impl RegistrationForm {
    /// Set a text field by its form name. Returns false for names that are not form text fields.
    pub fn set(&mut self, field: AttendeeField, value: String) -> bool {
        let slot = match field {
            AttendeeField::FullName => &mut self.full_name,
            AttendeeField::ContactNumber => &mut self.contact_number,
            AttendeeField::CompanyName => &mut self.company_name,
            AttendeeField::CurrentPosition => &mut self.current_position,
            AttendeeField::Batch => &mut self.batch,
            AttendeeField::StudentId => &mut self.student_id,
            AttendeeField::Email => &mut self.email,
            AttendeeField::Address => &mut self.address,
            AttendeeField::Id | AttendeeField::RegistrationDate | AttendeeField::ProfilePicture => {
                return false
            }
        };
        *slot = value;
        true
    }
}

/// Every failed field with its message. Serializes as `{"field": "message"}`.
#[derive(PartialEq, Eq, Debug, Clone, Default, Serialize)]
pub struct FieldErrors(BTreeMap<AttendeeField, String>);

impl FieldErrors {
    pub fn add(&mut self, field: AttendeeField, message: impl Into<String>) {
        self.0.entry(field).or_insert_with(|| message.into());
    }

    pub fn get(&self, field: AttendeeField) -> Option<&str> {
        self.0.get(&field).map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&AttendeeField, &String)> {
        self.0.iter()
    }
}

impl fmt::Display for FieldErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let messages: Vec<String> = self
            .0
            .iter()
            .map(|(field, msg)| format!("{}: {}", field, msg))
            .collect();
        write!(f, "{}", messages.join("; "))
    }
}

/// Limits applied to the uploaded profile picture.
#[derive(PartialEq, Debug, Clone, Copy)]
pub struct IntakeRules {
    pub require_profile_picture: bool,
    pub max_profile_picture_bytes: u64,
}

impl IntakeRules {
    pub fn from_settings(settings: &Settings) -> Self {
        IntakeRules {
            require_profile_picture: settings.require_profile_picture(),
            max_profile_picture_bytes: settings.max_profile_picture_bytes(),
        }
    }
}

impl Default for IntakeRules {
    fn default() -> Self {
        IntakeRules::from_settings(&Settings::default())
    }
}

fn within_limit(
    errors: &mut FieldErrors,
    field: AttendeeField,
    value: &str,
    label: &str,
    max_chars: usize,
) {
    if value.chars().count() > max_chars {
        errors.add(
            field,
            format!("{} must be at most {} characters", label, max_chars),
        );
    }
}

/// Human size limit, e.g. `2MB`, `1.5MB` or `512KB`.
fn size_label(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = 1024 * 1024;
    if bytes >= MB && bytes % MB == 0 {
        format!("{}MB", bytes / MB)
    } else if bytes >= MB {
        format!("{:.1}MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{}KB", bytes / KB)
    } else {
        format!("{} bytes", bytes)
    }
}

fn required(errors: &mut FieldErrors, field: AttendeeField, value: &str, message: &str) -> bool {
    if value.is_empty() {
        errors.add(field, message);
        false
    } else {
        true
    }
}

/// Check a submitted form, collecting every failure instead of stopping at the first.
///
/// On success every text field of the draft is trimmed.
pub fn validate(
    form: &RegistrationForm,
    profile_picture: Option<ProfilePicture>,
    rules: &IntakeRules,
) -> Result<RegistrationDraft, FieldErrors> {
    let mut errors = FieldErrors::default();

    let draft = RegistrationDraft {
        full_name: form.full_name.trim().to_owned(),
        contact_number: form.contact_number.trim().to_owned(),
        company_name: form.company_name.trim().to_owned(),
        current_position: form.current_position.trim().to_owned(),
        batch: form.batch.trim().to_owned(),
        student_id: form.student_id.trim().to_owned(),
        email: form.email.trim().to_owned(),
        address: form.address.trim().to_owned(),
        profile_picture,
    };

    required(&mut errors, AttendeeField::FullName, &draft.full_name, "Full name is required");

    if required(
        &mut errors,
        AttendeeField::ContactNumber,
        &draft.contact_number,
        "Contact number is required",
    ) && !contact_number_regex().is_match(&draft.contact_number)
    {
        errors.add(AttendeeField::ContactNumber, "Please enter a valid phone number");
    }

    if required(&mut errors, AttendeeField::Email, &draft.email, "Email is required")
        && !email_regex().is_match(&draft.email)
    {
        errors.add(AttendeeField::Email, "Please enter a valid email address");
    }

    required(
        &mut errors,
        AttendeeField::CompanyName,
        &draft.company_name,
        "Company name is required",
    );
    required(
        &mut errors,
        AttendeeField::CurrentPosition,
        &draft.current_position,
        "Current position is required",
    );
    required(&mut errors, AttendeeField::Batch, &draft.batch, "Batch is required");

    if !draft.student_id.is_empty() && !student_id_regex().is_match(&draft.student_id) {
        errors.add(
            AttendeeField::StudentId,
            "Please enter a valid student ID (numbers only)",
        );
    }

    for (field, value, label, max_chars) in [
        (AttendeeField::FullName, &draft.full_name, "Full name", MAX_FULL_NAME_CHARS),
        (
            AttendeeField::ContactNumber,
            &draft.contact_number,
            "Contact number",
            MAX_CONTACT_NUMBER_CHARS,
        ),
        (AttendeeField::Email, &draft.email, "Email", MAX_EMAIL_CHARS),
        (
            AttendeeField::CompanyName,
            &draft.company_name,
            "Company name",
            MAX_COMPANY_NAME_CHARS,
        ),
        (
            AttendeeField::CurrentPosition,
            &draft.current_position,
            "Current position",
            MAX_CURRENT_POSITION_CHARS,
        ),
        (AttendeeField::Batch, &draft.batch, "Batch", MAX_BATCH_CHARS),
        (AttendeeField::StudentId, &draft.student_id, "Student ID", MAX_STUDENT_ID_CHARS),
        (AttendeeField::Address, &draft.address, "Address", MAX_ADDRESS_CHARS),
    ] {
        within_limit(&mut errors, field, value, label, max_chars);
    }

    match &draft.profile_picture {
        Some(picture) => {
            if !picture.content_type.starts_with("image/") {
                errors.add(AttendeeField::ProfilePicture, "Please upload an image file");
            } else if picture.size > rules.max_profile_picture_bytes {
                errors.add(
                    AttendeeField::ProfilePicture,
                    format!(
                        "Image size should be less than {}",
                        size_label(rules.max_profile_picture_bytes)
                    ),
                );
            }
        }
        None if rules.require_profile_picture => {
            errors.add(AttendeeField::ProfilePicture, "Profile picture is required");
        }
        None => {}
    }

    if errors.is_empty() {
        Ok(draft)
    } else {
        log::warn!("Rejected registration with {} invalid fields", errors.len());
        Err(errors)
    }
}
