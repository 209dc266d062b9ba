//! Patient form diffing and identity merge.

use crate::documents::normalize::clean_document_number;
use crate::domain::{BookingPatient, BookingPatientUpdate, DocumentType, ProcessedDocumentPayload};

/// Editable copy of a booking patient as the collector sees it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PatientForm {
    pub current_patient_id: String,
    pub new_patient_id: String,
    pub name: String,
    /// Raw text from the age field.
    pub age: String,
    pub gender: String,
    pub national_id: String,
}

impl PatientForm {
    /// Form prefilled from the stored snapshot.
    pub fn from_patient(patient: &BookingPatient) -> Self {
        Self {
            current_patient_id: patient.patient_id.clone(),
            new_patient_id: patient.patient_id.clone(),
            name: patient.name.clone(),
            age: patient.age.map(|a| a.to_string()).unwrap_or_default(),
            gender: patient.gender.clone().unwrap_or_default(),
            national_id: patient.national_id.clone().unwrap_or_default(),
        }
    }
}

/// Some(value) when `value` is non-empty and differs from `original`.
fn changed_text(value: &str, original: &str) -> Option<String> {
    let value = value.trim();
    (!value.is_empty() && value != original.trim()).then(|| value.to_string())
}

fn diff_patient(form: &PatientForm, source: &BookingPatient) -> BookingPatientUpdate {
    let national_id = form.national_id.trim();
    let original_national_id = source.national_id.as_deref().unwrap_or("").trim();

    BookingPatientUpdate {
        current_patient_id: source.patient_id.clone(),
        new_patient_id: changed_text(&form.new_patient_id, &source.patient_id),
        name: changed_text(&form.name, &source.name),
        age: form
            .age
            .trim()
            .parse::<u32>()
            .ok()
            .filter(|age| Some(*age) != source.age),
        gender: changed_text(&form.gender, source.gender.as_deref().unwrap_or("")),
        // Clearing the national id is a real change.
        national_id: (national_id != original_national_id).then(|| national_id.to_string()),
    }
}

/// Minimal updates for edited forms, in form order.
///
/// Forms with no matching patient are dropped, as are forms that change
/// nothing.
pub fn build_patient_updates(forms: &[PatientForm], source: &[BookingPatient]) -> Vec<BookingPatientUpdate> {
    forms
        .iter()
        .filter_map(|form| {
            let patient = source
                .iter()
                .find(|p| p.patient_id == form.current_patient_id)?;
            let update = diff_patient(form, patient);
            (!update.is_empty()).then_some(update)
        })
        .collect()
}

/// Fill empty form fields from a scanned document. Returns true when any
/// field changed.
pub fn merge_extracted_identity(form: &mut PatientForm, payload: &ProcessedDocumentPayload) -> bool {
    let data = &payload.extracted_data;
    let mut changed = false;

    let mut fill = |field: &mut String, value: &str| {
        let value = value.trim();
        if field.trim().is_empty() && !value.is_empty() {
            *field = value.to_string();
            changed = true;
        }
    };

    match payload.document_type {
        DocumentType::EidFront | DocumentType::Passport => {
            fill(&mut form.national_id, &clean_document_number(&data.document_number));
        }
        DocumentType::EidBack => {}
    }
    fill(&mut form.name, &data.full_name);
    fill(&mut form.gender, &data.gender);

    changed
}
