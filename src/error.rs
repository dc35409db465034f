use std::fmt;

pub type BeaconResult<T> = Result<T, BeaconError>;

#[derive(Debug)]
pub enum BeaconError {
    Message(String),
    IOError(std::io::Error),
    Chain(String, Box<Self>),
    List(BeaconErrorList),
    AddrParseError(std::net::AddrParseError),
}

impl BeaconError {
    pub fn msg<S>(msg: S) -> Self
    where
        S: Into<String>,
    {
        Self::Message(msg.into())
    }

    pub fn wrap<S>(msg: S, chained: Self) -> Self
    where
        S: Into<String>,
    {
        Self::Chain(msg.into(), Box::new(chained))
    }
}

pub trait BeaconWrap<T, E> {
    /// Wrap the error value with additional context.
    fn wrap<C>(self, context: C) -> BeaconResult<T>
    where
        C: Into<String>,
        E: Into<BeaconError>;
}

impl<T, E> BeaconWrap<T, E> for Result<T, E>
where
    E: Into<BeaconError>,
{
    fn wrap<C>(self, msg: C) -> BeaconResult<T>
    where
        C: Into<String>,
        E: Into<BeaconError>,
    {
        // Not using map_err to save 2 useless frames off the captured backtrace
        // in ext_context.
        match self {
            Ok(ok) => Ok(ok),
            Err(error) => Err(BeaconError::wrap(msg, error.into())),
        }
    }
}

impl fmt::Display for BeaconError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Message(s) => write!(f, "{s}"),
            Self::Chain(s, e) => write!(f, "{s}: {e}"),
            Self::IOError(e) => write!(f, "IO error: {e}"),
            Self::AddrParseError(e) => write!(f, "parse address: {e}"),
            Self::List(list) => {
                let mut iter = list.0.iter();
                if let Some(first) = iter.next() {
                    write!(f, "{first}")?;
                }
                for err in iter {
                    write!(f, "\n{err}")?;
                }
                Ok(())
            }
        }
    }
}

impl std::error::Error for BeaconError {}

impl From<std::io::Error> for BeaconError {
    fn from(err: std::io::Error) -> Self {
        Self::IOError(err)
    }
}

impl From<nix::Error> for BeaconError {
    fn from(err: nix::Error) -> Self {
        Self::IOError(err.into())
    }
}

impl From<std::net::AddrParseError> for BeaconError {
    fn from(err: std::net::AddrParseError) -> Self {
        Self::AddrParseError(err)
    }
}

impl From<std::num::ParseIntError> for BeaconError {
    fn from(err: std::num::ParseIntError) -> Self {
        Self::Message(err.to_string())
    }
}

impl From<std::num::ParseFloatError> for BeaconError {
    fn from(err: std::num::ParseFloatError) -> Self {
        Self::Message(err.to_string())
    }
}

impl From<bollard::errors::Error> for BeaconError {
    fn from(err: bollard::errors::Error) -> Self {
        Self::Message(err.to_string())
    }
}

#[cfg(feature = "libvirt")]
impl From<virt::error::Error> for BeaconError {
    fn from(err: virt::error::Error) -> Self {
        Self::Message(err.to_string())
    }
}

#[derive(Debug, Default)]
pub struct BeaconErrorList(Vec<BeaconError>);

impl BeaconErrorList {
    pub fn new() -> Self {
        Self(vec![])
    }

    pub fn push(&mut self, err: BeaconError) {
        self.0.push(err)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}
