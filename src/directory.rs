//! A directory's content is the list of its children's primary addresses:
//! `[count:4][address:4]...`, big-endian, stored like any file's bytes.

use crate::config::ADDRESS_SIZE;
use crate::{Error, Result};

pub fn encode_children(addresses: &[u32]) -> Vec<u8> {
    let mut out = Vec::with_capacity(ADDRESS_SIZE * (addresses.len() + 1));
    out.extend_from_slice(&(addresses.len() as u32).to_be_bytes());
    for addr in addresses {
        out.extend_from_slice(&addr.to_be_bytes());
    }
    out
}

/// `dir_address` only labels the error if the content is corrupt.
pub fn decode_children(dir_address: u32, bytes: &[u8]) -> Result<Vec<u32>> {
    let corrupt = |detail: String| Error::Corruption {
        address: dir_address,
        detail,
    };
    let words: Vec<u32> = bytes
        .chunks(ADDRESS_SIZE)
        .map(|chunk| {
            <[u8; ADDRESS_SIZE]>::try_from(chunk)
                .map(u32::from_be_bytes)
                .map_err(|_| corrupt(format!("directory content of {} bytes is not word-aligned", bytes.len())))
        })
        .collect::<Result<_>>()?;

    let (count, children) = words
        .split_first()
        .ok_or_else(|| corrupt("directory content is empty".into()))?;
    if *count as usize != children.len() {
        return Err(corrupt(format!(
            "directory claims {count} children but stores {}",
            children.len()
        )));
    }
    Ok(children.to_vec())
}

/// A one-shot listing of a directory's children, in insertion order.
///
/// The names are captured when the stream is opened. The stream can be
/// consumed once; asking for a second pass is an error.
#[derive(Debug)]
pub struct DirectoryStream {
    dir: Vec<String>,
    names: Vec<String>,
    consumed: bool,
}

impl DirectoryStream {
    pub(crate) fn new(dir: Vec<String>, names: Vec<String>) -> Self {
        Self {
            dir,
            names,
            consumed: false,
        }
    }

    /// Hands out the child names. Fails with `InvalidState` on the second call.
    pub fn iter(&mut self) -> Result<std::vec::IntoIter<String>> {
        if self.consumed {
            return Err(Error::InvalidState("directory stream already consumed"));
        }
        self.consumed = true;
        Ok(core::mem::take(&mut self.names).into_iter())
    }

    /// Like `iter`, but yields each child's full path components.
    pub fn entries(&mut self) -> Result<impl Iterator<Item = Vec<String>> + use<>> {
        let dir = self.dir.clone();
        Ok(self.iter()?.map(move |name| {
            let mut path = dir.clone();
            path.push(name);
            path
        }))
    }
}
