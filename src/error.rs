//! Status & error taxonomy (component A).
//!
//! Every fallible operation in this crate returns a [`Status`], which is a
//! `(category, code)` pair carried by [`Error`]. A `Status` is `Status::OK`
//! when its code is `0` and its category is the generic category; any other
//! combination is an error. Categories classify codes without needing a
//! match over every possible value: `is_cancellation`/`is_timeout`
//! predicates let combinators (`timeout`, stop propagation) recognize the
//! statuses they care about regardless of which category produced them.

use thiserror::Error;

/// Coarse origin of a [`Status`]/[`Error`].
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum Category {
    /// POSIX-equivalent generic codes (includes the `OK`/`0` code).
    Generic,
    /// Platform-specific codes (errno / Win32), classified like `Generic`.
    System,
    /// DNS resolution failures.
    Netdb,
    /// TLS backend errors.
    Tls,
    /// MongoDB server-reported `{code, errmsg}`.
    Server,
    /// Domain-specific errors raised by callers above the core (CRUD).
    Crud,
    /// Foreign/unrecognized error codes.
    Unknown,
}

/// Well-known generic codes, loosely POSIX-flavored, used by `Category::Generic`.
pub mod generic_code {
    pub const OK: i32 = 0;
    pub const ECANCELED: i32 = 125;
    pub const ETIMEDOUT: i32 = 110;
    pub const ETIME: i32 = 62;
    pub const EPROTO: i32 = 71;
    pub const EINVAL: i32 = 22;
}

/// `(category, code)` pair. Cheap to copy; carried alongside values through
/// the async kernel (component H) as the completion signal.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub struct Status {
    pub category: Category,
    pub code: i32,
}

impl Status {
    /// The canonical "no error" status.
    pub const OK: Status = Status {
        category: Category::Generic,
        code: generic_code::OK,
    };

    #[must_use]
    pub fn new(category: Category, code: i32) -> Self {
        Self { category, code }
    }

    #[must_use]
    pub fn is_ok(&self) -> bool {
        !self.is_error()
    }

    /// A status is an error iff the category's predicate classifies the
    /// code as an error, or (absent a predicate) the code is non-zero.
    #[must_use]
    pub fn is_error(&self) -> bool {
        self.code != generic_code::OK
    }

    #[must_use]
    pub fn is_cancellation(&self) -> bool {
        matches!(self.category, Category::Generic | Category::System) && self.code == generic_code::ECANCELED
    }

    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self.category, Category::Generic | Category::System)
            && (self.code == generic_code::ETIMEDOUT || self.code == generic_code::ETIME)
    }

    #[must_use]
    pub fn cancelled() -> Self {
        Self::new(Category::Generic, generic_code::ECANCELED)
    }

    #[must_use]
    pub fn timed_out() -> Self {
        Self::new(Category::Generic, generic_code::ETIMEDOUT)
    }
}

impl Default for Status {
    fn default() -> Self {
        Self::OK
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}({})", self.category, self.code)
    }
}

/// The crate-wide error type. One non-exhaustive enum: every internal
/// failure mode gets its own variant, with `#[from]` conversions wired up
/// where a single external error type maps cleanly onto one variant.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    /// Low-level I/O failure (socket read/write, connect, resolve).
    #[error("I/O error")]
    Io(#[from] std::io::Error),

    /// TLS handshake or record-layer failure.
    #[error("TLS protocol error")]
    Tls(#[from] rustls::Error),

    /// The configured server name was not a valid DNS name for TLS.
    #[error("invalid TLS server name")]
    TlsInvalidName(#[from] rustls::pki_types::InvalidDnsNameError),

    /// A BSON buffer failed to parse.
    #[error("invalid BSON: {0:?}")]
    Bson(crate::bson::view::BsonError),

    /// A parser-combinator rule rejected or errored while decomposing a
    /// document (component G).
    #[error("document validation failed: {0}")]
    Validation(String),

    /// The MongoDB server returned `ok: false` on a reply.
    #[error("server error {code}: {message}")]
    Server { code: i32, message: String },

    /// A protocol framing invariant was violated while decoding a wire
    /// message (component J). Fatal for the current operation.
    #[error("protocol error: {0}")]
    Protocol(&'static str),

    /// The operation was cancelled via its handler's stop mechanism.
    #[error("operation cancelled")]
    Cancelled,

    /// The operation did not complete before its deadline.
    #[error("operation timed out")]
    TimedOut,

    /// Checked-arithmetic overflow while computing a length (component C).
    #[error("integer overflow computing a BSON length")]
    LengthOverflow,

    /// Misuse of the connection pool or async kernel (starting an operation
    /// twice, checking out from a closed pool, ...).
    #[error("usage error: {0}")]
    Usage(&'static str),
}

impl Error {
    #[must_use]
    pub fn status(&self) -> Status {
        match self {
            Error::Cancelled => Status::cancelled(),
            Error::TimedOut => Status::timed_out(),
            Error::Server { code, .. } => Status::new(Category::Server, *code),
            Error::Tls(_) | Error::TlsInvalidName(_) => Status::new(Category::Tls, 1),
            Error::Io(source) => Status::new(Category::System, source.raw_os_error().unwrap_or(-1)),
            _ => Status::new(Category::Unknown, -1),
        }
    }
}

/// Abbreviation of `Result<T, Error>`.
pub type Result<T> = std::result::Result<T, Error>;
