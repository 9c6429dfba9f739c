//! Worker instance definition templates.
//!
//! A template is compose-file text with `{placeholder}` fields; `{{` and
//! `}}` produce literal braces. Fields are checked when the template is
//! loaded, so a typo fails at startup rather than at the first provision.

use std::path::{Path, PathBuf};

use thiserror::Error;

/// Built-in definition for a creative, flat, RCON-enabled server.
pub const DEFAULT_TEMPLATE: &str = r#"services:
  minecraft:
    image: {image}
    container_name: {container_name}
    environment:
      EULA: "TRUE"
      VERSION: "{version}"
      TYPE: "VANILLA"
      MODE: "creative"
      LEVEL_TYPE: "flat"
      DIFFICULTY: "peaceful"
      SPAWN_MONSTERS: "false"
      ONLINE_MODE: "false"
      ENABLE_RCON: "true"
      RCON_PASSWORD: "{rcon_password}"
      RCON_PORT: "25575"
    ports:
      - "{port}:25565"
      - "{rcon_port}:25575"
    volumes:
      - world-{worker_id}:/data
volumes:
  world-{worker_id}:
"#;

#[derive(Debug, Error)]
pub enum TemplateError {
    #[error("unknown placeholder {{{0}}}")]
    UnknownPlaceholder(String),

    #[error("unterminated placeholder at byte {0}")]
    Unterminated(usize),

    #[error("unmatched '}}' at byte {0}")]
    Unmatched(usize),

    #[error("failed to read template {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Field {
    WorkerId,
    ContainerName,
    Port,
    RconPort,
    RconPassword,
    Image,
    Version,
}

impl Field {
    fn parse(name: &str) -> Option<Self> {
        Some(match name {
            "worker_id" => Self::WorkerId,
            "container_name" => Self::ContainerName,
            "port" => Self::Port,
            "rcon_port" => Self::RconPort,
            "rcon_password" => Self::RconPassword,
            "image" => Self::Image,
            "version" => Self::Version,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Text(String),
    Field(Field),
}

/// Values substituted into a template for one worker.
#[derive(Debug, Clone)]
pub struct TemplateParams<'a> {
    pub worker_id: &'a str,
    pub container_name: &'a str,
    pub port: u16,
    pub rcon_port: u16,
    pub rcon_password: &'a str,
    pub image: &'a str,
    pub version: &'a str,
}

/// A parsed instance definition template.
#[derive(Debug, Clone)]
pub struct WorkerTemplate {
    segments: Vec<Segment>,
}

impl WorkerTemplate {
    pub fn parse(text: &str) -> Result<Self, TemplateError> {
        let mut segments = Vec::new();
        let mut literal = String::new();
        let mut chars = text.char_indices().peekable();

        while let Some((pos, c)) = chars.next() {
            match c {
                '{' if chars.peek().map(|&(_, n)| n) == Some('{') => {
                    chars.next();
                    literal.push('{');
                }
                '}' if chars.peek().map(|&(_, n)| n) == Some('}') => {
                    chars.next();
                    literal.push('}');
                }
                '{' => {
                    let mut name = String::new();
                    loop {
                        match chars.next() {
                            Some((_, '}')) => break,
                            Some((_, c)) => name.push(c),
                            None => return Err(TemplateError::Unterminated(pos)),
                        }
                    }
                    let field = Field::parse(name.trim())
                        .ok_or_else(|| TemplateError::UnknownPlaceholder(name.clone()))?;
                    if !literal.is_empty() {
                        segments.push(Segment::Text(std::mem::take(&mut literal)));
                    }
                    segments.push(Segment::Field(field));
                }
                '}' => return Err(TemplateError::Unmatched(pos)),
                c => literal.push(c),
            }
        }
        if !literal.is_empty() {
            segments.push(Segment::Text(literal));
        }
        Ok(Self { segments })
    }

    /// Load from `path`, or the built-in template when `None`.
    pub async fn load(path: Option<&Path>) -> Result<Self, TemplateError> {
        match path {
            None => Self::parse(DEFAULT_TEMPLATE),
            Some(path) => {
                let text = tokio::fs::read_to_string(path)
                    .await
                    .map_err(|source| TemplateError::Read {
                        path: path.to_path_buf(),
                        source,
                    })?;
                Self::parse(&text)
            }
        }
    }

    pub fn render(&self, params: &TemplateParams<'_>) -> String {
        let mut out = String::new();
        for segment in &self.segments {
            match segment {
                Segment::Text(text) => out.push_str(text),
                Segment::Field(field) => match field {
                    Field::WorkerId => out.push_str(params.worker_id),
                    Field::ContainerName => out.push_str(params.container_name),
                    Field::Port => out.push_str(&params.port.to_string()),
                    Field::RconPort => out.push_str(&params.rcon_port.to_string()),
                    Field::RconPassword => out.push_str(params.rcon_password),
                    Field::Image => out.push_str(params.image),
                    Field::Version => out.push_str(params.version),
                },
            }
        }
        out
    }
}
