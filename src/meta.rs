//! Annotation helpers for the managed object.

use crate::resource::Managed;

/// Annotation holding the cloud-side identifier of the resource.
pub const ANNOTATION_EXTERNAL_NAME: &str = "tfbridge.io/external-name";

/// Annotation holding the encoded (gzip+base64) provisioner state.
pub const ANNOTATION_STATE: &str = "tfbridge.io/state";

pub fn get_external_name(mg: &dyn Managed) -> Option<String> {
    mg.annotations()
        .get(ANNOTATION_EXTERNAL_NAME)
        .filter(|v| !v.is_empty())
        .cloned()
}

pub fn set_external_name(mg: &mut dyn Managed, name: &str) {
    mg.annotations_mut()
        .insert(ANNOTATION_EXTERNAL_NAME.to_string(), name.to_string());
}

pub fn get_state(mg: &dyn Managed) -> Option<String> {
    mg.annotations()
        .get(ANNOTATION_STATE)
        .filter(|v| !v.is_empty())
        .cloned()
}

pub fn set_state(mg: &mut dyn Managed, state: &str) {
    mg.annotations_mut()
        .insert(ANNOTATION_STATE.to_string(), state.to_string());
}

pub fn was_deleted(mg: &dyn Managed) -> bool {
    mg.deletion_timestamp().is_some()
}
