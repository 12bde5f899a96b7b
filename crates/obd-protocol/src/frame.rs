//! Query and Response Frame Types
//!
//! A [`Query`] describes one extended-PID request; a [`RawFrame`] holds the
//! decoded CAN payload lines that came back for it.

use crate::error::ObdError;
use serde::{Deserialize, Serialize};
use std::slice::SliceIndex;

/// One extended-PID request addressed to a single module
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Query {
    header: u32,
    filter_address: u32,
    command: u32,
    frame_lengths: Vec<usize>,
}

impl Query {
    /// Largest frame count the adapter accepts as a single-digit suffix
    pub const MAX_FRAMES: usize = 9;

    /// Create a query
    ///
    /// # Arguments
    /// * `header` - 24-bit transmit header (the module to talk to)
    /// * `filter_address` - CAN id to accept responses from, usually `header + 8`
    /// * `command` - 16- or 24-bit command, e.g. `0x22F40D`
    /// * `frame_lengths` - byte count of each expected response line
    pub fn new(
        header: u32,
        filter_address: u32,
        command: u32,
        frame_lengths: impl Into<Vec<usize>>,
    ) -> Result<Self, ObdError> {
        let frame_lengths = frame_lengths.into();

        if header > 0xFF_FFFF {
            return Err(ObdError::InvalidQuery(format!(
                "header {:#X} does not fit in 24 bits",
                header
            )));
        }
        if command > 0xFF_FFFF {
            return Err(ObdError::InvalidQuery(format!(
                "command {:#X} does not fit in 24 bits",
                command
            )));
        }
        if frame_lengths.len() > Self::MAX_FRAMES {
            return Err(ObdError::InvalidQuery(format!(
                "{} frames requested, adapter supports at most {}",
                frame_lengths.len(),
                Self::MAX_FRAMES
            )));
        }

        Ok(Self {
            header,
            filter_address,
            command,
            frame_lengths,
        })
    }

    /// Transmit header
    pub fn header(&self) -> u32 {
        self.header
    }

    /// Response filter address
    pub fn filter_address(&self) -> u32 {
        self.filter_address
    }

    /// Command code
    pub fn command(&self) -> u32 {
        self.command
    }

    /// Expected byte count per response frame
    pub fn frame_lengths(&self) -> &[usize] {
        &self.frame_lengths
    }

    /// Text sent to the adapter: the command in hex followed by the frame count
    ///
    /// 16-bit commands use 4 hex digits, larger ones 6.
    pub fn command_string(&self) -> String {
        let frames = self.frame_lengths.len();
        if self.command <= 0xFFFF {
            format!("{:04X}{}", self.command, frames)
        } else {
            format!("{:06X}{}", self.command, frames)
        }
    }
}

/// Response payload: one byte vector per CAN frame, in arrival order
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawFrame {
    frames: Vec<Vec<u8>>,
}

impl RawFrame {
    /// Wrap already decoded frames
    pub fn new(frames: Vec<Vec<u8>>) -> Self {
        Self { frames }
    }

    pub(crate) fn push(&mut self, frame: Vec<u8>) {
        self.frames.push(frame);
    }

    /// Number of frames
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    /// Whether no frame was received
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Bytes of frame `index`, empty if there is no such frame
    pub fn frame(&self, index: usize) -> &[u8] {
        self.frames.get(index).map(Vec::as_slice).unwrap_or(&[])
    }

    /// A byte range of frame `index`, empty if out of bounds
    pub fn bytes<R>(&self, index: usize, range: R) -> &[u8]
    where
        R: SliceIndex<[u8], Output = [u8]>,
    {
        self.frame(index).get(range).unwrap_or(&[])
    }

    /// Byte count of every frame
    pub fn shape(&self) -> Vec<usize> {
        self.frames.iter().map(Vec::len).collect()
    }

    /// Total payload bytes over all frames
    pub fn total_bytes(&self) -> usize {
        self.frames.iter().map(Vec::len).sum()
    }

    /// Whether the frame count and every frame length equal `expected`
    pub fn matches_shape(&self, expected: &[usize]) -> bool {
        self.frames.len() == expected.len()
            && self.frames.iter().zip(expected).all(|(f, &n)| f.len() == n)
    }

    /// Iterate over the frames
    pub fn iter(&self) -> impl Iterator<Item = &[u8]> {
        self.frames.iter().map(Vec::as_slice)
    }

    /// Take the frames out
    pub fn into_frames(self) -> Vec<Vec<u8>> {
        self.frames
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_string_width() {
        let short = Query::new(0x7E0, 0x7E8, 0x0100, vec![4]).unwrap();
        assert_eq!(short.command_string(), "01001");

        let extended = Query::new(0x797, 0x79F, 0x22203A, vec![6, 6, 7]).unwrap();
        assert_eq!(extended.command_string(), "22203A3");
    }

    #[test]
    fn test_query_rejects_oversized_fields() {
        assert!(matches!(
            Query::new(0x1_000_000, 0, 0x22F40D, vec![4]),
            Err(ObdError::InvalidQuery(_))
        ));
        assert!(matches!(
            Query::new(0x7E0, 0x7E8, 0x1_000_000, vec![4]),
            Err(ObdError::InvalidQuery(_))
        ));
        assert!(matches!(
            Query::new(0x7E0, 0x7E8, 0x22F40D, vec![1; 10]),
            Err(ObdError::InvalidQuery(_))
        ));
    }

    #[test]
    fn test_shape_matching() {
        let frame = RawFrame::new(vec![vec![0; 6], vec![0; 7], vec![0; 7]]);
        assert!(frame.matches_shape(&[6, 7, 7]));
        assert!(!frame.matches_shape(&[6, 7]));
        assert!(!frame.matches_shape(&[6, 7, 6]));
        assert_eq!(frame.total_bytes(), 20);
    }

    #[test]
    fn test_out_of_range_access_is_empty() {
        let frame = RawFrame::new(vec![vec![0x62, 0xF4, 0x0D, 0x28]]);
        assert_eq!(frame.bytes(0, 3..), &[0x28]);
        assert!(frame.bytes(0, 3..9).is_empty());
        assert!(frame.frame(2).is_empty());
    }
}
