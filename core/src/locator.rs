//! Canonical resource URLs.
//!
//! A server-provided `uri` always wins; otherwise the path is assembled
//! from the endpoint, the resource segment and the identifier, skipping
//! whichever parts are absent.

/// Anything that can be addressed on the remote service.
pub trait Locate {
    /// Identifier, when one is set.
    fn locate_id(&self) -> Option<&str>;

    /// Server-provided canonical link, when one is known.
    fn locate_uri(&self) -> Option<&str> {
        None
    }
}

/// A bare address: no id and no uri addresses the resource collection.
#[derive(Debug, Clone, Copy, Default)]
pub struct Target<'a> {
    pub id: Option<&'a str>,
    pub uri: Option<&'a str>,
}

impl<'a> Target<'a> {
    /// The collection itself.
    pub fn collection() -> Self {
        Self::default()
    }

    pub fn id(id: &'a str) -> Self {
        Self {
            id: Some(id),
            uri: None,
        }
    }
}

impl Locate for Target<'_> {
    fn locate_id(&self) -> Option<&str> {
        self.id.filter(|id| !id.is_empty() && *id != "0")
    }

    fn locate_uri(&self) -> Option<&str> {
        self.uri.filter(|uri| !uri.is_empty())
    }
}

/// Endpoint plus resource segment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceLocator {
    endpoint: String,
    resource: String,
}

impl ResourceLocator {
    pub fn new(endpoint: &str, resource: &str) -> Self {
        Self {
            endpoint: endpoint.trim_end_matches('/').to_string(),
            resource: resource.trim_matches('/').to_string(),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn resource(&self) -> &str {
        &self.resource
    }

    pub fn get_url(&self, target: &impl Locate) -> String {
        if let Some(uri) = target.locate_uri() {
            return uri.to_string();
        }
        let mut path = self.endpoint.clone();
        if !self.resource.is_empty() {
            path.push('/');
            path.push_str(&self.resource);
        }
        if let Some(id) = target.locate_id() {
            path.push('/');
            path.push_str(id);
        }
        path
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collection_url_has_no_id_segment() {
        let locator = ResourceLocator::new("http://example.com/rest", "node");
        assert_eq!(locator.get_url(&Target::collection()), "http://example.com/rest/node");
    }

    #[test]
    fn id_is_appended() {
        let locator = ResourceLocator::new("http://example.com/rest/", "node");
        assert_eq!(locator.get_url(&Target::id("42")), "http://example.com/rest/node/42");
    }

    #[test]
    fn zero_id_counts_as_unset() {
        let locator = ResourceLocator::new("http://example.com/rest", "user");
        assert_eq!(locator.get_url(&Target::id("0")), "http://example.com/rest/user");
    }

    #[test]
    fn empty_resource_is_omitted() {
        let locator = ResourceLocator::new("http://example.com/rest", "");
        assert_eq!(locator.get_url(&Target::id("7")), "http://example.com/rest/7");
    }

    #[test]
    fn uri_wins_over_id() {
        let locator = ResourceLocator::new("http://example.com/rest", "node");
        let target = Target {
            id: Some("42"),
            uri: Some("http://mirror.example.com/rest/node/42"),
        };
        assert_eq!(locator.get_url(&target), "http://mirror.example.com/rest/node/42");
    }
}
