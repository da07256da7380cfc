#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SourceId(pub u32);

/// A template's text together with the name it was loaded under.
#[derive(Debug, Clone)]
pub struct SourceFile {
    pub id: SourceId,
    pub name: String,
    pub contents: String,
}

impl SourceFile {
    pub fn new(id: SourceId, name: impl Into<String>, contents: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            contents: contents.into(),
        }
    }

    /// A source that was not loaded from any named template.
    pub fn anonymous(contents: impl Into<String>) -> Self {
        Self::new(SourceId(0), "<template>", contents)
    }
}
