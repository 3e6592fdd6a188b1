//! RDF serialization detection by extension and content sniffing.

use std::fmt;
use std::io::Read;
use std::path::Path;

use serde::{Deserialize, Serialize};

/// Number of leading bytes inspected when sniffing content.
const SNIFF_LEN: usize = 8192;

/// Extensions accepted by file-batch submission.
pub const SUPPORTED_EXTENSIONS: &[&str] = &[
    "ttl", "turtle", "nt", "nq", "trig", "rdf", "owl", "jsonld", "json",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RdfFormat {
    Turtle,
    NTriples,
    NQuads,
    TriG,
    RdfXml,
    JsonLd,
}

impl RdfFormat {
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.trim_start_matches('.').to_ascii_lowercase().as_str() {
            "ttl" | "turtle" => Some(RdfFormat::Turtle),
            "nt" => Some(RdfFormat::NTriples),
            "nq" => Some(RdfFormat::NQuads),
            "trig" => Some(RdfFormat::TriG),
            "rdf" | "owl" | "xml" => Some(RdfFormat::RdfXml),
            "jsonld" | "json" => Some(RdfFormat::JsonLd),
            _ => None,
        }
    }

    pub fn from_path(path: &Path) -> Option<Self> {
        path.extension()
            .and_then(|e| e.to_str())
            .and_then(Self::from_extension)
    }

    /// Canonical file extension used when staging a payload.
    pub fn extension(&self) -> &'static str {
        match self {
            RdfFormat::Turtle => "ttl",
            RdfFormat::NTriples => "nt",
            RdfFormat::NQuads => "nq",
            RdfFormat::TriG => "trig",
            RdfFormat::RdfXml => "rdf",
            RdfFormat::JsonLd => "jsonld",
        }
    }

    /// Media type sent to the graph store.
    pub fn content_type(&self) -> &'static str {
        match self {
            RdfFormat::Turtle => "text/turtle",
            RdfFormat::NTriples => "application/n-triples",
            RdfFormat::NQuads => "application/n-quads",
            RdfFormat::TriG => "application/trig",
            RdfFormat::RdfXml => "application/rdf+xml",
            RdfFormat::JsonLd => "application/ld+json",
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            RdfFormat::Turtle => "turtle",
            RdfFormat::NTriples => "n-triples",
            RdfFormat::NQuads => "n-quads",
            RdfFormat::TriG => "trig",
            RdfFormat::RdfXml => "rdf-xml",
            RdfFormat::JsonLd => "json-ld",
        }
    }

    /// Whether the serialization carries graph names.
    pub fn is_dataset_format(&self) -> bool {
        matches!(self, RdfFormat::NQuads | RdfFormat::TriG)
    }

    /// Whether provenance can be appended as N-Triples lines without
    /// re-parsing the document.
    pub fn supports_line_append(&self) -> bool {
        matches!(
            self,
            RdfFormat::Turtle | RdfFormat::NTriples | RdfFormat::NQuads | RdfFormat::TriG
        )
    }

    /// The streaming parser/serializer format, if the RDF stack handles it.
    /// JSON-LD is handled as plain JSON instead.
    pub(crate) fn to_oxrdfio(self) -> Option<oxrdfio::RdfFormat> {
        match self {
            RdfFormat::Turtle => Some(oxrdfio::RdfFormat::Turtle),
            RdfFormat::NTriples => Some(oxrdfio::RdfFormat::NTriples),
            RdfFormat::NQuads => Some(oxrdfio::RdfFormat::NQuads),
            RdfFormat::TriG => Some(oxrdfio::RdfFormat::TriG),
            RdfFormat::RdfXml => Some(oxrdfio::RdfFormat::RdfXml),
            RdfFormat::JsonLd => None,
        }
    }
}

impl fmt::Display for RdfFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Classification of a staged file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Detected {
    /// A text RDF serialization.
    Rdf(RdfFormat),
    /// Not text; uploaded as-is with the content type implied by its extension.
    Binary(Option<RdfFormat>),
}

impl Detected {
    pub fn format(&self) -> Option<RdfFormat> {
        match self {
            Detected::Rdf(f) => Some(*f),
            Detected::Binary(f) => *f,
        }
    }

    pub fn content_type(&self) -> &'static str {
        self.format()
            .map(|f| f.content_type())
            .unwrap_or("application/octet-stream")
    }
}

/// Sniffs the serialization of a raw text payload.
///
/// Falls back to Turtle, the most permissive of the line-oriented syntaxes.
pub fn detect_text(content: &str) -> RdfFormat {
    let trimmed = content.trim_start_matches('\u{feff}').trim_start();
    if trimmed.starts_with('{') || trimmed.starts_with('[') {
        return RdfFormat::JsonLd;
    }
    if trimmed.starts_with("<?xml") || trimmed.starts_with("<rdf:RDF") {
        return RdfFormat::RdfXml;
    }

    let mut statements = 0usize;
    let mut quads = 0usize;
    let mut triples = 0usize;
    for line in trimmed.lines().take(200) {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let upper = line.to_ascii_uppercase();
        if upper.starts_with("GRAPH ") || (line.ends_with('{') && !line.starts_with('@')) {
            return RdfFormat::TriG;
        }
        if line.starts_with('@') || upper.starts_with("PREFIX ") || upper.starts_with("BASE ") {
            return RdfFormat::Turtle;
        }
        statements += 1;
        match line_term_count(line) {
            Some(4) => quads += 1,
            Some(3) => triples += 1,
            _ => {}
        }
    }

    if statements > 0 && quads == statements {
        RdfFormat::NQuads
    } else if statements > 0 && triples == statements {
        RdfFormat::NTriples
    } else {
        RdfFormat::Turtle
    }
}

/// Counts the terms of an N-Triples/N-Quads style line, or `None` if the
/// line does not look like one (prefixed names, missing final dot).
fn line_term_count(line: &str) -> Option<usize> {
    let body = line.strip_suffix('.')?.trim_end();
    let mut terms = 0;
    let mut chars = body.chars().peekable();
    while let Some(&c) = chars.peek() {
        match c {
            ' ' | '\t' => {
                chars.next();
            }
            '<' => {
                chars.find(|&c| c == '>')?;
                terms += 1;
            }
            '_' => {
                while chars.peek().is_some_and(|c| !c.is_whitespace()) {
                    chars.next();
                }
                terms += 1;
            }
            '"' => {
                chars.next();
                let mut escaped = false;
                loop {
                    let c = chars.next()?;
                    if escaped {
                        escaped = false;
                    } else if c == '\\' {
                        escaped = true;
                    } else if c == '"' {
                        break;
                    }
                }
                while chars.peek().is_some_and(|c| !c.is_whitespace()) {
                    chars.next();
                }
                terms += 1;
            }
            _ => return None,
        }
    }
    Some(terms)
}

/// Classifies a staged file by extension, falling back to content sniffing.
///
/// Files containing NUL bytes in their first block are treated as binary.
pub fn detect_file(path: &Path) -> std::io::Result<Detected> {
    let mut head = Vec::with_capacity(SNIFF_LEN);
    std::fs::File::open(path)?
        .take(SNIFF_LEN as u64)
        .read_to_end(&mut head)?;

    let by_extension = RdfFormat::from_path(path);
    if head.contains(&0) {
        return Ok(Detected::Binary(by_extension));
    }
    if let Some(format) = by_extension {
        return Ok(Detected::Rdf(format));
    }
    Ok(Detected::Rdf(detect_text(&String::from_utf8_lossy(&head))))
}

/// Lowercased extension of a file name, empty if none.
pub fn extension_of(file_name: &str) -> String {
    Path::new(file_name)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default()
}

pub fn is_supported_extension(ext: &str) -> bool {
    SUPPORTED_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str())
}
