//! Various docsign-wide constants.


//------------ Binary Names -------------------------------------------------

/// The friendly name of the `docsign` binary.
pub const DOCSIGN_APP: &str = "docsign";


//------------ Config Files Paths -------------------------------------------

/// The default path to the docsign config file.
pub const DOCSIGN_DEFAULT_CONFIG_FILE: &str = "/etc/docsign.conf";


//------------ Environment Variables ----------------------------------------

/// The environment variable with the log level.
///
/// The variable should contain the name of a [`log::LevelFilter`]. It will
/// be overwritten by the config file. The default is “info.”
pub const DOCSIGN_ENV_LOG_LEVEL: &str = "DOCSIGN_LOG_LEVEL";

/// The environment variable with the path to the config file.
pub const DOCSIGN_ENV_CONFIG: &str = "DOCSIGN_CONFIG";


//------------ Storage Layout -----------------------------------------------

/// The directory under the storage root holding the signature ledger.
pub const SIGNATURES_DIR: &str = "signatures";

/// The directory under the storage root holding signed artifacts.
pub const ARTIFACTS_DIR: &str = "artifacts";

/// The directory under the storage root holding the token registry.
pub const TOKENS_DIR: &str = "tokens";

/// The file name of the token registry.
pub const TOKEN_REGISTRY_FILE: &str = "registry.json";

/// The prefix of artifact references, the first path segment.
pub const SIGNED_ARTIFACT_PREFIX: &str = "signed";


//------------ Signing ------------------------------------------------------

/// The digest algorithm recorded for every signature.
pub const HASH_ALGORITHM: &str = "SHA-256";

/// The signature algorithm used with the token's private key.
pub const SIGNATURE_ALGORITHM: &str = "RSA-PKCS1-SHA256";

/// The prefix of the progress channel topic for an operator.
pub const PROGRESS_TOPIC_PREFIX: &str = "user_";

/// The number of characters of a document id used in its document code.
pub const DOCUMENT_CODE_ID_CHARS: usize = 8;


//------------ Defaults -----------------------------------------------------

pub const DEFAULT_SESSION_TTL_MINUTES: i64 = 30;
pub const DEFAULT_SESSION_SWEEP_SECONDS: u64 = 60;
pub const DEFAULT_MAX_BATCH_SIZE: usize = 50;
pub const DEFAULT_EXPIRY_WARNING_DAYS: i64 = 30;
pub const DEFAULT_SIGNING_LOCATION: &str = "Viet Nam";

/// How many progress events may queue up per topic before old ones drop.
pub const PROGRESS_CHANNEL_CAPACITY: usize = 256;
