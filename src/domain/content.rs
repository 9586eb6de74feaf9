//! Content namespaces of the resort site and the invalidation tags they carry.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A logical dataset edited through the back office.
///
/// Each namespace owns a version counter (`v:<namespace>`) and a namespace
/// tag equal to [`Namespace::as_str`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Namespace {
    Rooms,
    Offers,
    Events,
    Attractions,
    Blogs,
    Gallery,
    Testimonials,
    StaticImages,
}

impl Namespace {
    pub const ALL: [Namespace; 8] = [
        Namespace::Rooms,
        Namespace::Offers,
        Namespace::Events,
        Namespace::Attractions,
        Namespace::Blogs,
        Namespace::Gallery,
        Namespace::Testimonials,
        Namespace::StaticImages,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Namespace::Rooms => "rooms",
            Namespace::Offers => "offers",
            Namespace::Events => "events",
            Namespace::Attractions => "attractions",
            Namespace::Blogs => "blogs",
            Namespace::Gallery => "gallery",
            Namespace::Testimonials => "testimonials",
            Namespace::StaticImages => "static_images",
        }
    }

    /// Tag naming every cached read of this namespace.
    pub fn tag(self) -> String {
        self.as_str().to_string()
    }

    /// Prefix of per-item tags, for namespaces addressed by slug.
    fn item_kind(self) -> Option<&'static str> {
        match self {
            Namespace::Rooms => Some("room"),
            Namespace::Offers => Some("offer"),
            Namespace::Events => Some("event"),
            Namespace::Blogs => Some("blog"),
            Namespace::Attractions
            | Namespace::Gallery
            | Namespace::Testimonials
            | Namespace::StaticImages => None,
        }
    }

    /// Tag naming cached reads of one item, e.g. `blog:spring-menu`.
    ///
    /// Namespaces without addressable items fall back to the namespace tag.
    pub fn item_tag(self, slug: &str) -> String {
        match self.item_kind() {
            Some(kind) => format!("{kind}:{slug}"),
            None => self.tag(),
        }
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl AsRef<str> for Namespace {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("unknown content namespace `{0}`")]
pub struct UnknownNamespace(pub String);

impl FromStr for Namespace {
    type Err = UnknownNamespace;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_ascii_lowercase().replace('-', "_");
        Namespace::ALL
            .into_iter()
            .find(|ns| ns.as_str() == normalized)
            .ok_or_else(|| UnknownNamespace(value.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_accepts_display_form() {
        for ns in Namespace::ALL {
            assert_eq!(ns.to_string().parse::<Namespace>(), Ok(ns));
        }
        assert_eq!("Static-Images".parse(), Ok(Namespace::StaticImages));
    }

    #[test]
    fn parse_rejects_unknown() {
        assert_eq!(
            "spa".parse::<Namespace>(),
            Err(UnknownNamespace("spa".to_string()))
        );
    }

    #[test]
    fn item_tags() {
        assert_eq!(Namespace::Blogs.item_tag("spring-menu"), "blog:spring-menu");
        assert_eq!(Namespace::Rooms.item_tag("ocean-suite"), "room:ocean-suite");
        assert_eq!(Namespace::Gallery.item_tag("pool"), "gallery");
    }
}
