//! Incremental file uploads.
//!
//! Log files are often sent several times while they grow. The tracker
//! remembers how many bytes of each file were uploaded to each destination
//! and the worker only sends what lies beyond that. A file that did not grow
//! past the uploaded length is not sent again; `REUPLOAD` forces a full
//! upload.

use std::collections::HashMap;

use crate::remote::Destination;

/// What to upload for a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadPlan {
    /// Nothing beyond the uploaded length.
    Skip,
    /// Content is longer than what was uploaded; send the bytes from
    /// `offset`.
    Append { offset: u64 },
    /// Send the whole content, replacing the remote file.
    Replace,
}

/// Tracks the uploaded length per destination and file name.
#[derive(Debug, Default)]
pub struct UploadTracker {
    uploaded: HashMap<(Destination, String), u64>,
}

impl UploadTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decides how to upload `content` as `name` to `destination`.
    pub fn plan(
        &self,
        destination: &Destination,
        name: &str,
        content: &[u8],
        reupload: bool,
    ) -> UploadPlan {
        if reupload {
            return UploadPlan::Replace;
        }

        match self.uploaded.get(&(destination.clone(), name.to_string())) {
            None => UploadPlan::Replace,
            Some(&len) if content.len() as u64 > len => UploadPlan::Append { offset: len },
            Some(_) => UploadPlan::Skip,
        }
    }

    /// Remembers that `content` was uploaded following `plan`.
    pub fn record(
        &mut self,
        destination: &Destination,
        name: &str,
        plan: UploadPlan,
        content: &[u8],
    ) {
        if plan != UploadPlan::Skip {
            self.uploaded
                .insert((destination.clone(), name.to_string()), content.len() as u64);
        }
    }

    /// Number of bytes of a file known to be on the remote side.
    pub fn uploaded_len(&self, destination: &Destination, name: &str) -> Option<u64> {
        self.uploaded
            .get(&(destination.clone(), name.to_string()))
            .copied()
    }
}
