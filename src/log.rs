use crate::engine::ReqId;
use std::error::Error;
use std::fmt::{Arguments, Display};
use std::ops::{BitOr, BitOrAssign};
use std::str::FromStr;

/// Log record that is passed to a logger
pub struct LogRecord<'a> {
    /// Worker that produced the record
    pub worker: u32,
    /// Logging level
    pub level: LogLevel,
    /// Request the record relates to, if any
    pub req: Option<ReqId>,
    /// Freeform formatted text.  This can be output with any macro
    /// that accepts a format-string, e.g. `println!("{}", fmt)`.
    pub fmt: Arguments<'a>,
}

/// Severity levels for logging
///
/// These are the levels accepted by the engine's log sink, from most
/// severe (`Emerg`) to least severe (`Debug`).  The numeric value of
/// each level is the one the engine uses.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[repr(u32)]
pub enum LogLevel {
    /// System is unusable
    Emerg = 1,

    /// Action must be taken immediately
    Alert = 2,

    /// Critical conditions.  Failed task enqueues are reported at
    /// this level.
    Crit = 3,

    /// Errors
    Error = 4,

    /// Warnings
    Warn = 5,

    /// Normal but significant conditions
    Notice = 6,

    /// Informational logging
    Info = 7,

    /// Debugging (low priority logging)
    Debug = 8,
}

impl LogLevel {
    /// Return the name of the [`LogLevel`] as a static string.
    ///
    /// [`LogLevel`]: enum.LogLevel.html
    pub fn name(self) -> &'static str {
        match self {
            Self::Emerg => "EMERG",
            Self::Alert => "ALERT",
            Self::Crit => "CRIT",
            Self::Error => "ERROR",
            Self::Warn => "WARN",
            Self::Notice => "NOTICE",
            Self::Info => "INFO",
            Self::Debug => "DEBUG",
        }
    }

    /// Return a slice containing all defined logging levels, most
    /// severe first
    pub fn all_levels() -> &'static [LogLevel] {
        &[
            Self::Emerg,
            Self::Alert,
            Self::Crit,
            Self::Error,
            Self::Warn,
            Self::Notice,
            Self::Info,
            Self::Debug,
        ]
    }
}

impl Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.name().fmt(f)
    }
}

impl FromStr for LogLevel {
    type Err = LogLevelError;

    /// This does a case-insensitive match to the level names as
    /// returned by [`LogLevel::name`]
    ///
    /// [`LogLevel::name`]: enum.LogLevel.html#method.name
    fn from_str(s: &str) -> Result<LogLevel, LogLevelError> {
        let s = s.trim();
        macro_rules! ret_if_matches {
            ($name:literal, $val:expr) => {
                if s.eq_ignore_ascii_case($name) {
                    return Ok($val);
                }
            };
        }
        if let Some(c) = s.as_bytes().first() {
            match c {
                b'E' | b'e' => {
                    ret_if_matches!("EMERG", Self::Emerg);
                    ret_if_matches!("ERROR", Self::Error);
                }
                b'A' | b'a' => ret_if_matches!("ALERT", Self::Alert),
                b'C' | b'c' => ret_if_matches!("CRIT", Self::Crit),
                b'W' | b'w' => ret_if_matches!("WARN", Self::Warn),
                b'N' | b'n' => ret_if_matches!("NOTICE", Self::Notice),
                b'I' | b'i' => ret_if_matches!("INFO", Self::Info),
                b'D' | b'd' => ret_if_matches!("DEBUG", Self::Debug),
                _ => (),
            }
        }
        Err(LogLevelError)
    }
}

/// Invalid [`LogLevel`] passed to [`LogLevel::from_str`]
///
/// [`LogLevel::from_str`]: enum.LogLevel.html#method.from_str
/// [`LogLevel`]: enum.LogLevel.html
#[derive(Debug, Eq, PartialEq)]
pub struct LogLevelError;
impl Error for LogLevelError {}
impl Display for LogLevelError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        "invalid logging level".fmt(f)
    }
}

/// Filter for logging levels
///
/// This is a "copy" value which represents a set of enabled logging
/// levels.  Filters can be combined using the `|` and `|=` bit-or
/// operators.  A filter can be generated from a [`LogLevel`] using
/// [`LogFilter::from`], which also enables every more severe level.
///
/// [`LogFilter::from`]: struct.LogFilter.html#method.from
/// [`LogLevel`]: enum.LogLevel.html
#[derive(Debug, Default, Copy, Clone, Eq, PartialEq)]
pub struct LogFilter(u32);

impl LogFilter {
    /// Return a [`LogFilter`] with no levels enabled
    ///
    /// [`LogFilter`]: struct.LogFilter.html
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Return a [`LogFilter`] with all the listed levels enabled, as
    /// converted by [`LogFilter::from`].
    ///
    /// [`LogFilter::from`]: struct.LogFilter.html#method.from
    /// [`LogFilter`]: struct.LogFilter.html
    #[inline]
    pub fn all(levels: &[LogLevel]) -> Self {
        let mut rv = Self::new();
        for level in levels {
            rv |= Self::from(*level);
        }
        rv
    }

    /// Test whether the given [`LogLevel`] is enabled
    ///
    /// [`LogLevel`]: enum.LogLevel.html
    #[inline]
    pub fn allows(&self, level: LogLevel) -> bool {
        0 != (self.0 & (1 << (level as u32)))
    }

    /// Test whether the set of enabled levels is empty
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }
}

impl From<LogLevel> for LogFilter {
    /// Convert a [`LogLevel`] into a [`LogFilter`].  The given level
    /// and all higher severity levels are enabled, so
    /// `LogFilter::from(LogLevel::Warn)` enables `EMERG` to `WARN`.
    ///
    /// [`LogFilter`]: struct.LogFilter.html
    /// [`LogLevel`]: enum.LogLevel.html
    #[inline]
    fn from(level: LogLevel) -> Self {
        // Bits 1..=level
        let upto = (1_u32 << (level as u32 + 1)) - 1;
        Self(upto & !1)
    }
}

impl BitOr for LogFilter {
    type Output = Self;

    #[inline]
    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for LogFilter {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl Display for LogFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        "LogFilter(".fmt(f)?;
        let mut first = true;
        for level in LogLevel::all_levels() {
            if self.allows(*level) {
                if first {
                    first = false;
                } else {
                    ",".fmt(f)?;
                }
                level.name().fmt(f)?;
            }
        }
        ")".fmt(f)
    }
}

impl FromStr for LogFilter {
    type Err = LogLevelError;

    fn from_str(s: &str) -> Result<LogFilter, LogLevelError> {
        let mut rv = LogFilter::new();
        for level in s.split(',') {
            let level = LogLevel::from_str(level)?;
            rv |= LogFilter::from(level);
        }
        Ok(rv)
    }
}
