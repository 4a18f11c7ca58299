use crate::commands::executable::Executable;
use crate::commands::CommandParser;
use crate::frame::Frame;
use crate::store::Store;
use crate::Error;

/// Removes `key`. Removing a key that does not exist is not an error.
#[derive(Debug, PartialEq)]
pub struct Del {
    pub key: String,
}

impl Executable for Del {
    fn exec(self, store: Store) -> Result<Frame, Error> {
        store.lock().remove(&self.key);
        Ok(Frame::Simple("OK".to_string()))
    }
}

impl TryFrom<&mut CommandParser> for Del {
    type Error = Error;

    fn try_from(parser: &mut CommandParser) -> Result<Self, Self::Error> {
        let key = parser.next_string("key")?;
        Ok(Self { key })
    }
}
