//! Splits large RDF documents into bounded named-graph fragments.
//!
//! Parsing is streaming: at most one chunk of quads is held at a time.
//! Each fragment is an N-Quads document whose statements all sit in the
//! target graph, so fragments can be loaded independently and in any
//! order. Blank node labels are kept as written, but a store may scope
//! them per request, so a blank node shared across fragments can end up
//! as several nodes remotely.

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};

use oxrdf::{GraphName, NamedNode, Quad};
use oxrdfio::{RdfFormat as OxFormat, RdfParser, RdfSerializer};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::ChunkError;
use crate::format::RdfFormat;

/// Content type of every fragment.
pub const CHUNK_CONTENT_TYPE: &str = "application/n-quads";

/// One serialized fragment.
#[derive(Debug, Clone)]
pub struct Chunk {
    pub index: usize,
    pub quads: usize,
    pub payload: Vec<u8>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChunkStats {
    pub chunks: usize,
    pub quads: usize,
}

/// Chunk sizing.
#[derive(Debug, Clone)]
pub struct ChunkPlan {
    pub max_quads: usize,
    pub very_large_max_quads: usize,
    pub very_large_threshold: u64,
}

impl ChunkPlan {
    /// Quads per fragment for a document of `size` bytes. Very large
    /// documents get smaller fragments.
    pub fn max_quads_for(&self, size: u64) -> usize {
        let max = if size > self.very_large_threshold {
            self.very_large_max_quads
        } else {
            self.max_quads
        };
        max.max(1)
    }
}

fn serialize_chunk(quads: &[Quad]) -> Result<Vec<u8>, ChunkError> {
    let mut serializer = RdfSerializer::from_format(OxFormat::NQuads).for_writer(Vec::new());
    for quad in quads {
        serializer
            .serialize_quad(quad)
            .map_err(|e| ChunkError::Serialize(e.to_string()))?;
    }
    serializer
        .finish()
        .map_err(|e| ChunkError::Serialize(e.to_string()))
}

/// Streams `reader` and hands fragments of at most `max_quads` quads to
/// `sink`. Stops early, without error, once `sink` returns `false`.
pub fn chunk_reader<R: Read>(
    reader: R,
    format: RdfFormat,
    graph: &str,
    max_quads: usize,
    mut sink: impl FnMut(Chunk) -> bool,
) -> Result<ChunkStats, ChunkError> {
    let parser_format = format
        .to_oxrdfio()
        .ok_or_else(|| ChunkError::Unsupported(format.to_string()))?;
    let target =
        GraphName::NamedNode(NamedNode::new(graph).map_err(|_| ChunkError::InvalidGraph(graph.to_string()))?);
    let max_quads = max_quads.max(1);

    let mut stats = ChunkStats::default();
    let mut buffer: Vec<Quad> = Vec::with_capacity(max_quads);

    let mut flush = |buffer: &mut Vec<Quad>, stats: &mut ChunkStats| -> Result<bool, ChunkError> {
        let payload = serialize_chunk(buffer)?;
        let chunk = Chunk {
            index: stats.chunks,
            quads: buffer.len(),
            payload,
        };
        stats.chunks += 1;
        stats.quads += buffer.len();
        buffer.clear();
        Ok(sink(chunk))
    };

    for quad in RdfParser::from_format(parser_format).for_reader(reader) {
        let quad = quad.map_err(|e| ChunkError::Parse {
            format: format.to_string(),
            message: e.to_string(),
        })?;
        buffer.push(Quad::new(quad.subject, quad.predicate, quad.object, target.clone()));
        if buffer.len() >= max_quads && !flush(&mut buffer, &mut stats)? {
            return Ok(stats);
        }
    }
    if !buffer.is_empty() {
        flush(&mut buffer, &mut stats)?;
    }
    Ok(stats)
}

/// Chunks a file on a blocking thread, delivering fragments over a
/// bounded channel. Dropping the receiver stops the parser.
pub fn spawn_file_chunker(
    path: PathBuf,
    format: RdfFormat,
    graph: String,
    max_quads: usize,
    capacity: usize,
) -> (mpsc::Receiver<Chunk>, JoinHandle<Result<ChunkStats, ChunkError>>) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    let handle = tokio::task::spawn_blocking(move || {
        let file = open(&path)?;
        chunk_reader(BufReader::new(file), format, &graph, max_quads, |chunk| {
            tx.blocking_send(chunk).is_ok()
        })
    });
    (rx, handle)
}

fn open(path: &Path) -> Result<File, ChunkError> {
    File::open(path).map_err(|e| ChunkError::Io {
        path: path.to_path_buf(),
        source: e,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    const GRAPH: &str = "https://example.org/graph";

    fn turtle_doc(n: usize) -> String {
        let mut doc = String::from("@prefix ex: <https://example.org/> .\n");
        for i in 0..n {
            doc.push_str(&format!("ex:s{} ex:p \"value {}\" .\n", i, i));
        }
        doc.push_str("_:b1 ex:q ex:s0 .\n");
        doc
    }

    fn parse_nquads(payload: &[u8]) -> Vec<Quad> {
        RdfParser::from_format(OxFormat::NQuads)
            .for_reader(payload)
            .collect::<Result<Vec<_>, _>>()
            .unwrap()
    }

    #[test]
    fn test_chunks_respect_bound_and_round_trip() {
        let doc = turtle_doc(25);
        let mut chunks = Vec::new();
        let stats = chunk_reader(doc.as_bytes(), RdfFormat::Turtle, GRAPH, 10, |c| {
            chunks.push(c);
            true
        })
        .unwrap();

        assert_eq!(stats, ChunkStats { chunks: 3, quads: 26 });
        assert!(chunks.iter().all(|c| c.quads <= 10));

        let merged: HashSet<String> = chunks
            .iter()
            .flat_map(|c| parse_nquads(&c.payload))
            .map(|q| {
                assert_eq!(q.graph_name.to_string(), format!("<{}>", GRAPH));
                format!("{} {} {}", q.subject, q.predicate, q.object)
            })
            .collect();
        let original: HashSet<String> = RdfParser::from_format(OxFormat::Turtle)
            .for_reader(doc.as_bytes())
            .map(|q| {
                let q = q.unwrap();
                format!("{} {} {}", q.subject, q.predicate, q.object)
            })
            .collect();
        assert_eq!(merged, original);
    }

    #[test]
    fn test_sink_can_stop_early() {
        let doc = turtle_doc(30);
        let mut seen = 0;
        let stats = chunk_reader(doc.as_bytes(), RdfFormat::Turtle, GRAPH, 5, |_| {
            seen += 1;
            seen < 2
        })
        .unwrap();
        assert_eq!(stats.chunks, 2);
    }

    #[test]
    fn test_rejects_unsupported_and_invalid() {
        assert!(matches!(
            chunk_reader("{}".as_bytes(), RdfFormat::JsonLd, GRAPH, 5, |_| true),
            Err(ChunkError::Unsupported(_))
        ));
        assert!(matches!(
            chunk_reader("".as_bytes(), RdfFormat::Turtle, "not an iri", 5, |_| true),
            Err(ChunkError::InvalidGraph(_))
        ));
        assert!(matches!(
            chunk_reader("ex:a ex:b".as_bytes(), RdfFormat::Turtle, GRAPH, 5, |_| true),
            Err(ChunkError::Parse { .. })
        ));
    }

    #[test]
    fn test_plan_uses_smaller_chunks_for_very_large() {
        let plan = ChunkPlan {
            max_quads: 50_000,
            very_large_max_quads: 10_000,
            very_large_threshold: 1_000,
        };
        assert_eq!(plan.max_quads_for(10), 50_000);
        assert_eq!(plan.max_quads_for(5_000), 10_000);
    }

    #[tokio::test]
    async fn test_file_chunker_streams_over_channel() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("doc.ttl");
        std::fs::write(&path, turtle_doc(12)).unwrap();

        let (mut rx, handle) =
            spawn_file_chunker(path, RdfFormat::Turtle, GRAPH.to_string(), 4, 1);
        let mut received = 0;
        while let Some(chunk) = rx.recv().await {
            assert_eq!(chunk.index, received);
            received += 1;
        }
        let stats = handle.await.unwrap().unwrap();
        assert_eq!(stats.chunks, received);
        assert_eq!(stats.quads, 13);
    }
}
