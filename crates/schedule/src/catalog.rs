use cinema_models::{FormatId, Hall, HallId, SessionType};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CatalogError {
    #[error("unknown hall {0:?}")]
    UnknownHall(String),
    #[error("unknown session format {0:?}")]
    UnknownFormat(String),
    #[error("the backend returned no halls or no session formats")]
    Empty,
}

/// Server-provided option lists that hall and format ids are resolved against.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Catalog {
    pub halls: Vec<Hall>,
    pub formats: Vec<SessionType>,
}

impl Catalog {
    pub fn new(halls: Vec<Hall>, formats: Vec<SessionType>) -> Self {
        Self { halls, formats }
    }

    pub fn hall_label(&self, id: HallId) -> String {
        self.halls
            .iter()
            .find(|h| h.id == id)
            .map(|h| h.name.clone())
            .unwrap_or_else(|| format!("#{id}"))
    }

    pub fn format_label(&self, id: FormatId) -> String {
        self.formats
            .iter()
            .find(|f| f.id == id)
            .map(|f| f.label.clone())
            .unwrap_or_else(|| format!("#{id}"))
    }

    pub fn has_hall(&self, id: HallId) -> bool {
        self.halls.iter().any(|h| h.id == id)
    }

    pub fn has_format(&self, id: FormatId) -> bool {
        self.formats.iter().any(|f| f.id == id)
    }

    /// Resolves a hall given either its numeric id or its name.
    pub fn resolve_hall(&self, input: &str) -> Result<HallId, CatalogError> {
        if let Ok(id) = input.parse::<HallId>() {
            if self.has_hall(id) {
                return Ok(id);
            }
        }
        self.halls
            .iter()
            .find(|h| h.name.trim().eq_ignore_ascii_case(input.trim()))
            .map(|h| h.id)
            .ok_or_else(|| CatalogError::UnknownHall(input.to_string()))
    }

    /// Resolves a session format given either its numeric id or its label ("2D").
    pub fn resolve_format(&self, input: &str) -> Result<FormatId, CatalogError> {
        if let Ok(id) = input.parse::<FormatId>() {
            if self.has_format(id) {
                return Ok(id);
            }
        }
        self.formats
            .iter()
            .find(|f| f.label.trim().eq_ignore_ascii_case(input.trim()))
            .map(|f| f.id)
            .ok_or_else(|| CatalogError::UnknownFormat(input.to_string()))
    }

    pub fn first_hall(&self) -> Result<HallId, CatalogError> {
        self.halls.first().map(|h| h.id).ok_or(CatalogError::Empty)
    }

    pub fn first_format(&self) -> Result<FormatId, CatalogError> {
        self.formats.first().map(|f| f.id).ok_or(CatalogError::Empty)
    }
}
