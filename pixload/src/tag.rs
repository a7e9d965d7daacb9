//! Caller tags.

use std::fmt;
use std::sync::Weak;

use crate::image_loader::Shared;

/// Bit set on every tag allocated by [`ImageLoader::tag`](crate::ImageLoader::tag).
const ALLOCATED: u64 = 1 << 63;

/// Opaque handle correlating a load with its callbacks and scoping its
/// cancellation.
///
/// A tag waits on at most one request at a time: starting a new load with
/// the same tag detaches it from the previous one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Tag(u64);

impl Tag {
    /// Wraps a host-managed id.
    ///
    /// Ids below 2^63 never collide with tags allocated by a loader.
    pub const fn from_raw(raw: u64) -> Self {
        Tag(raw)
    }

    pub(crate) const fn allocated(sequence: u64) -> Self {
        Tag(ALLOCATED | sequence)
    }

    /// Returns the raw id.
    pub const fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{:x}", self.0)
    }
}

/// Owning handle for a [`Tag`].
///
/// Dropping it cancels whatever the tag is waiting on and discards any
/// callback for it that has not run yet. Tie it to the lifetime of the
/// view that displays the image.
pub struct TagHandle {
    tag: Tag,
    loader: Weak<Shared>,
}

impl TagHandle {
    pub(crate) fn new(tag: Tag, loader: Weak<Shared>) -> Self {
        Self { tag, loader }
    }

    /// Returns the tag.
    pub fn tag(&self) -> Tag {
        self.tag
    }
}

impl fmt::Debug for TagHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("TagHandle").field(&self.tag).finish()
    }
}

impl Drop for TagHandle {
    fn drop(&mut self) {
        if let Some(loader) = self.loader.upgrade() {
            loader.cancel(self.tag);
        }
    }
}
