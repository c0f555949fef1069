use serde::{Deserialize, Serialize};

/// Which application's patches a session uploads and lists.
/// The service hosts patches for several apps side by side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PatchType {
    #[default]
    Unconfigured,
    MiniAudicle,
    Auraglyph,
}

impl PatchType {
    /// Numeric id the service uses for this patch type.
    pub fn id(&self) -> u8 {
        match self {
            PatchType::Unconfigured => 0,
            PatchType::MiniAudicle => 1,
            PatchType::Auraglyph => 2,
        }
    }

    pub fn is_configured(&self) -> bool {
        *self != PatchType::Unconfigured
    }
}

/// Edit to a single field that can be left alone, replaced, or removed.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum FieldUpdate<T> {
    #[default]
    Unchanged,
    Set(T),
    Cleared,
}

impl<T> FieldUpdate<T> {
    pub fn is_unchanged(&self) -> bool {
        matches!(self, FieldUpdate::Unchanged)
    }

    /// Resulting value when applied to `current`.
    pub fn apply(self, current: Option<T>) -> Option<T> {
        match self {
            FieldUpdate::Unchanged => current,
            FieldUpdate::Set(value) => Some(value),
            FieldUpdate::Cleared => None,
        }
    }
}

impl<T> From<Option<T>> for FieldUpdate<T> {
    /// `Some` sets the field, `None` clears it.
    fn from(value: Option<T>) -> Self {
        match value {
            Some(value) => FieldUpdate::Set(value),
            None => FieldUpdate::Cleared,
        }
    }
}

/// Partial update of a patch's metadata. Fields left as `None` /
/// `FieldUpdate::Unchanged` are not sent and keep their current value.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PatchUpdate {
    pub hidden: Option<bool>,
    pub name: Option<String>,
    pub description: Option<String>,
    pub latitude: FieldUpdate<f64>,
    pub longitude: FieldUpdate<f64>,
}

impl PatchUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn hidden(mut self, hidden: bool) -> Self {
        self.hidden = Some(hidden);
        self
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn location(mut self, latitude: f64, longitude: f64) -> Self {
        self.latitude = FieldUpdate::Set(latitude);
        self.longitude = FieldUpdate::Set(longitude);
        self
    }

    pub fn clear_location(mut self) -> Self {
        self.latitude = FieldUpdate::Cleared;
        self.longitude = FieldUpdate::Cleared;
        self
    }

    pub fn is_empty(&self) -> bool {
        self.changed_fields().is_empty()
    }

    /// Names of the fields this update touches.
    pub fn changed_fields(&self) -> Vec<&'static str> {
        let mut fields = Vec::new();
        if self.hidden.is_some() {
            fields.push("hidden");
        }
        if self.name.is_some() {
            fields.push("name");
        }
        if self.description.is_some() {
            fields.push("description");
        }
        if !self.latitude.is_unchanged() {
            fields.push("latitude");
        }
        if !self.longitude.is_unchanged() {
            fields.push("longitude");
        }
        fields
    }
}
