//! Well-known IRIs, file names and limits shared across the engine.

use oxigraph::model::NamedNodeRef;

/// IRI that matches any value when it appears in a precondition or delete
/// pattern, including the graph position.
pub const WILDCARD_IRI: &str = "http://quadlog.org/.well-known/wildcard";
pub const WILDCARD: NamedNodeRef<'_> = NamedNodeRef::new_unchecked(WILDCARD_IRI);

/// Longest store name accepted by the catalog (in characters).
pub const MAX_STORE_NAME_LEN: usize = 1024;

// root layout
pub const CONFIG_FILE: &str = "quadlog.json";
pub const LOCK_FILE: &str = "quadlog.lock";
pub const STORES_DIR: &str = "stores";
pub const IMPORT_DIR: &str = "import";

// per-store layout
pub const STORE_METADATA_FILE: &str = "store.json";
pub const COMMIT_MANIFEST_FILE: &str = "commits.json";
pub const STATISTICS_FILE: &str = "statistics.json";
pub const GENERATIONS_DIR: &str = "generations";

// generation file framing
pub const GENERATION_MAGIC: &[u8; 4] = b"QLOG";
pub const GENERATION_ENDMARK: &[u8; 8] = b"QLOG_END";
pub const GENERATION_VERSION: u16 = 1;
pub const GENERATION_EXTENSION: &str = "qlg";
