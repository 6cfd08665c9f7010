use std::fmt;

/// Result alias used across the crate.
pub type WeaveResult<T> = Result<T, WeaveError>;

/// One element of a [`KeyPath`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyElem {
    /// Mapping key.
    Field(String),
    /// Sequence index.
    Index(usize),
}

/// Location of a value inside the specification document, rendered as `$.scenes[2].transition`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeyPath(Vec<KeyElem>);

impl KeyPath {
    /// The document root (`$`).
    pub fn root() -> Self {
        Self::default()
    }

    /// Return a new path extended by a mapping key.
    pub fn field(&self, name: impl Into<String>) -> Self {
        let mut out = self.clone();
        out.0.push(KeyElem::Field(name.into()));
        out
    }

    /// Return a new path extended by a sequence index.
    pub fn index(&self, i: usize) -> Self {
        let mut out = self.clone();
        out.0.push(KeyElem::Index(i));
        out
    }

    pub fn elems(&self) -> &[KeyElem] {
        &self.0
    }
}

impl fmt::Display for KeyPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("$")?;
        for e in &self.0 {
            match e {
                KeyElem::Field(name) => write!(f, ".{name}")?,
                KeyElem::Index(i) => write!(f, "[{i}]")?,
            }
        }
        Ok(())
    }
}

/// A render failure attributed to one scene.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SceneFailure {
    pub scene_id: String,
    pub message: String,
}

/// Coarse classification of [`WeaveError`] values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Invalid specification. Fatal, never retried.
    Configuration,
    /// A referenced file or media probe failed.
    Resource,
    /// The media backend failed to produce an artifact.
    Render,
    /// Cache bookkeeping drifted from the persisted state.
    CacheInconsistency,
    /// Work was aborted through a cancel token.
    Cancelled,
    Other,
}

#[derive(thiserror::Error, Debug)]
pub enum WeaveError {
    #[error("configuration error{}: {message}", location(.scene_id.as_deref(), .path))]
    Configuration {
        scene_id: Option<String>,
        path: KeyPath,
        message: String,
    },

    #[error(
        "configuration error in scene '{scene_id}': cannot determine duration \
         (set 'duration' or 'frames', or attach media/audio it can be derived from)"
    )]
    MissingDuration { scene_id: String },

    #[error(
        "configuration error: template '{template}' is missing required parameter(s): {}",
        .missing.join(", ")
    )]
    MissingTemplateParams {
        template: String,
        missing: Vec<String>,
    },

    #[error("configuration error: template recursion via {}", .chain.join(" -> "))]
    TemplateRecursion { chain: Vec<String> },

    #[error("resource error{}: {message}", scene_suffix(.scene_id.as_deref()))]
    Resource {
        scene_id: Option<String>,
        message: String,
    },

    #[error("render failed for scene '{scene_id}': {message}")]
    Render { scene_id: String, message: String },

    #[error("{} scene(s) failed to render: {}", .0.len(), summarize(.0))]
    RenderFailures(Vec<SceneFailure>),

    #[error("cache inconsistency: {0}")]
    CacheInconsistency(String),

    #[error("render cancelled")]
    Cancelled,

    #[error("serialization error: {0}")]
    Serde(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

fn location(scene_id: Option<&str>, path: &KeyPath) -> String {
    match scene_id {
        Some(id) => format!(" in scene '{id}' at {path}"),
        None => format!(" at {path}"),
    }
}

fn scene_suffix(scene_id: Option<&str>) -> String {
    scene_id
        .map(|id| format!(" in scene '{id}'"))
        .unwrap_or_default()
}

fn summarize(failures: &[SceneFailure]) -> String {
    failures
        .iter()
        .map(|f| format!("'{}' ({})", f.scene_id, f.message))
        .collect::<Vec<_>>()
        .join("; ")
}

impl WeaveError {
    pub fn config(path: KeyPath, msg: impl Into<String>) -> Self {
        Self::Configuration {
            scene_id: None,
            path,
            message: msg.into(),
        }
    }

    pub fn scene_config(scene_id: impl Into<String>, path: KeyPath, msg: impl Into<String>) -> Self {
        Self::Configuration {
            scene_id: Some(scene_id.into()),
            path,
            message: msg.into(),
        }
    }

    pub fn resource(scene_id: Option<&str>, msg: impl Into<String>) -> Self {
        Self::Resource {
            scene_id: scene_id.map(str::to_owned),
            message: msg.into(),
        }
    }

    pub fn render(scene_id: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Render {
            scene_id: scene_id.into(),
            message: msg.into(),
        }
    }

    pub fn serde(msg: impl Into<String>) -> Self {
        Self::Serde(msg.into())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Configuration { .. }
            | Self::MissingDuration { .. }
            | Self::MissingTemplateParams { .. }
            | Self::TemplateRecursion { .. }
            | Self::Serde(_) => ErrorKind::Configuration,
            Self::Resource { .. } => ErrorKind::Resource,
            Self::Render { .. } | Self::RenderFailures(_) => ErrorKind::Render,
            Self::CacheInconsistency(_) => ErrorKind::CacheInconsistency,
            Self::Cancelled => ErrorKind::Cancelled,
            Self::Other(_) => ErrorKind::Other,
        }
    }

    /// Relocate a configuration error raised at the document root to `path`.
    pub fn at_path(self, path: &KeyPath) -> Self {
        match self {
            Self::Configuration {
                scene_id,
                path: p,
                message,
            } if p.elems().is_empty() => Self::Configuration {
                scene_id,
                path: path.clone(),
                message,
            },
            other => other,
        }
    }

    /// Attach a scene id to a configuration or resource error that does not carry one yet.
    pub fn in_scene(self, id: &str) -> Self {
        match self {
            Self::Configuration {
                scene_id: None,
                path,
                message,
            } => Self::Configuration {
                scene_id: Some(id.to_owned()),
                path,
                message,
            },
            Self::Resource {
                scene_id: None,
                message,
            } => Self::Resource {
                scene_id: Some(id.to_owned()),
                message,
            },
            other => other,
        }
    }
}
