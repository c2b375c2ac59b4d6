//! The part of a .torrent file the engine needs: the pieces, their hashes and
//! how the content is laid out in files.
//!
//! Decoding the bencoded metainfo is done elsewhere, this is the already
//! decoded `info` dictionary.

use crate::{error::Error, piece::PieceHash};

/// File related information (Single-file format)
/// <https://fileformats.fandom.com/wiki/Torrent_file>
/// in a multi file format, `name` is name of the directory
/// `file_length` is specific to Single File format
/// in a multi file format, `file_length` is replaced to `files`
#[derive(Debug, PartialEq, Clone, Default)]
pub struct Info {
    /// name of the file, or of the root directory
    pub name: String,

    /// length in bytes of each piece, the last piece may have a smaller length
    pub piece_length: u32,

    /// A (byte) string consisting of the concatenation of all 20-byte SHA1
    /// hash values, one per piece.
    pub pieces: Vec<u8>,

    /// If the torrent has only 1 file, this value is some, and files is none
    pub file_length: Option<u64>,

    /// If the torrent has many files, this is some, and file_length is none.
    pub files: Option<Vec<File>>,
}

#[derive(Debug, PartialEq, Clone, Default)]
pub struct File {
    /// Length of the file in bytes.
    pub length: u64,
    /// Path of the file, excluding the parent name.
    pub path: Vec<String>,
}

impl Info {
    /// Build the info of a single file torrent.
    pub fn single_file(
        name: impl Into<String>,
        piece_length: u32,
        file_length: u64,
        hashes: impl IntoIterator<Item = PieceHash>,
    ) -> Self {
        Self {
            name: name.into(),
            piece_length,
            pieces: hashes.into_iter().flat_map(|h| h.0).collect(),
            file_length: Some(file_length),
            files: None,
        }
    }

    /// Calculate how many pieces there are.
    #[inline]
    pub fn pieces(&self) -> usize {
        self.pieces.len() / 20
    }

    /// Size of the entire torrent, in bytes.
    pub fn get_size(&self) -> u64 {
        match &self.files {
            Some(files) => files.iter().map(|f| f.length).sum(),
            None => self.file_length.unwrap_or_default(),
        }
    }

    /// Get the correct piece size, the last piece of a torrent
    /// might be smaller than the other pieces.
    pub fn piece_size(&self, piece_index: usize) -> u32 {
        if piece_index + 1 == self.pieces() {
            let remainder = self.get_size() % self.piece_length as u64;
            if remainder != 0 {
                return remainder as u32;
            }
        }
        self.piece_length
    }

    /// The expected hash of a piece, if the index is in range.
    pub fn piece_hash(&self, piece_index: usize) -> Option<PieceHash> {
        let b = piece_index * 20;
        let hash: [u8; 20] = self.pieces.get(b..b + 20)?.try_into().ok()?;
        Some(PieceHash(hash))
    }

    /// The files of this torrent, a single file torrent is a list of one
    /// file whose path is the name of the torrent.
    pub fn files(&self) -> Vec<File> {
        match &self.files {
            Some(files) => files.clone(),
            None => vec![File {
                length: self.file_length.unwrap_or_default(),
                path: vec![self.name.clone()],
            }],
        }
    }

    /// Check that the pieces describe the content exactly.
    pub fn validate(&self) -> Result<(), Error> {
        if self.piece_length == 0 {
            return Err(Error::InfoInvalid("piece length is zero".into()));
        }
        if self.pieces.len() % 20 != 0 {
            return Err(Error::InfoInvalid(format!(
                "pieces has {} bytes, which is not a multiple of 20",
                self.pieces.len()
            )));
        }
        if self.pieces() == 0 {
            return Err(Error::InfoInvalid("torrent has no pieces".into()));
        }

        let expected = self.get_size().div_ceil(self.piece_length as u64);
        if expected != self.pieces() as u64 {
            return Err(Error::InfoInvalid(format!(
                "{} bytes need {expected} pieces of {} bytes, but there are {} \
                 hashes",
                self.get_size(),
                self.piece_length,
                self.pieces()
            )));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info_95() -> Info {
        Info::single_file("foo", 20, 95, (0..5).map(|_| PieceHash([1; 20])))
    }

    #[test]
    fn piece_sizes() {
        let info = info_95();
        assert_eq!(info.pieces(), 5);
        assert_eq!(info.get_size(), 95);
        assert_eq!(info.piece_size(0), 20);
        assert_eq!(info.piece_size(3), 20);
        assert_eq!(info.piece_size(4), 15);
        assert!(info.validate().is_ok());
    }

    #[test]
    fn exact_multiple_last_piece() {
        let info =
            Info::single_file("foo", 20, 100, (0..5).map(|_| PieceHash([1; 20])));
        assert_eq!(info.piece_size(4), 20);
    }

    #[test]
    fn piece_hash_bounds() {
        let mut info = info_95();
        info.pieces[20..40].copy_from_slice(&[9; 20]);

        assert_eq!(info.piece_hash(1), Some(PieceHash([9; 20])));
        assert_eq!(info.piece_hash(4), Some(PieceHash([1; 20])));
        assert_eq!(info.piece_hash(5), None);
    }

    #[test]
    fn multi_file_size() {
        let info = Info {
            name: "dir".into(),
            piece_length: 10,
            pieces: vec![0; 60],
            file_length: None,
            files: Some(vec![
                File { length: 7, path: vec!["a".into()] },
                File { length: 20, path: vec!["b".into(), "c".into()] },
            ]),
        };

        assert_eq!(info.get_size(), 27);
        assert_eq!(info.piece_size(2), 7);
        assert_eq!(info.files().len(), 2);
        assert!(info.validate().is_ok());
    }

    #[test]
    fn invalid_infos() {
        let mut info = info_95();
        info.piece_length = 0;
        assert!(matches!(info.validate(), Err(Error::InfoInvalid(_))));

        let mut info = info_95();
        info.pieces.pop();
        assert!(matches!(info.validate(), Err(Error::InfoInvalid(_))));

        // 95 bytes need 5 pieces, not 4
        let mut info = info_95();
        info.pieces.truncate(80);
        assert!(matches!(info.validate(), Err(Error::InfoInvalid(_))));

        let info = Info::default();
        assert!(info.validate().is_err());
    }
}
