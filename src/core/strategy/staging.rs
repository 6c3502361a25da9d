//! Choice of the connectors to detect on a host, from its directives.
//!
//! | Directive | Meaning |
//! |---|---|
//! | `id` | include the connector |
//! | `#tag` | include connectors carrying the tag |
//! | `!id` | exclude the connector |
//! | `!#tag` | exclude connectors carrying the tag |
//! | `+id` | force the connector: staged without automatic detection and kept whatever its detection says |

use std::collections::BTreeSet;
use std::sync::Arc;

use crate::core::config::HostConfiguration;
use crate::core::connector::{Connector, ConnectorStore};

/// A connector selected for detection.
#[derive(Debug, Clone)]
pub struct StagedConnector {
    pub connector: Arc<Connector>,
    pub forced: bool,
}

#[derive(Debug, Default)]
struct Directives {
    forced: BTreeSet<String>,
    included: BTreeSet<String>,
    included_tags: BTreeSet<String>,
    excluded: BTreeSet<String>,
    excluded_tags: BTreeSet<String>,
}

impl Directives {
    fn parse<'a, I: IntoIterator<Item = &'a String>>(directives: I) -> Self {
        let mut parsed = Directives::default();
        for directive in directives {
            let directive = directive.trim();
            if let Some(id) = directive.strip_prefix('+') {
                parsed.forced.insert(id.trim().to_lowercase());
            } else if let Some(rest) = directive.strip_prefix('!') {
                match rest.trim().strip_prefix('#') {
                    Some(tag) => parsed.excluded_tags.insert(tag.trim().to_lowercase()),
                    None => parsed.excluded.insert(rest.trim().to_lowercase()),
                };
            } else if let Some(tag) = directive.strip_prefix('#') {
                parsed.included_tags.insert(tag.trim().to_lowercase());
            } else if !directive.is_empty() {
                parsed.included.insert(directive.to_lowercase());
            }
        }
        parsed
    }

    fn has_inclusions(&self) -> bool {
        !self.included.is_empty() || !self.included_tags.is_empty()
    }
}

fn has_any_tag(connector: &Connector, tags: &BTreeSet<String>) -> bool {
    tags.iter().any(|tag| connector.has_tag(tag))
}

/// Connectors to run detection for on `host`, in store order.
pub fn stage_connectors(store: &ConnectorStore, host: &HostConfiguration) -> Vec<StagedConnector> {
    let directives = Directives::parse(&host.connectors);
    let mut staged = Vec::new();

    for (id, connector) in store.iter() {
        let key = id.to_lowercase();

        if directives.forced.contains(&key) {
            staged.push(StagedConnector {
                connector: connector.clone(),
                forced: true,
            });
            continue;
        }

        if directives.excluded.contains(&key) || has_any_tag(connector, &directives.excluded_tags) {
            continue;
        }

        let explicitly_included = directives.included.contains(&key);
        let included = if directives.has_inclusions() {
            explicitly_included || has_any_tag(connector, &directives.included_tags)
        } else {
            true
        };
        if !included {
            continue;
        }

        if connector.detection.disable_auto_detection && !explicitly_included {
            continue;
        }

        let applies = &connector.detection.applies_to;
        if !applies.is_empty() && !applies.contains(&host.host_type) {
            log::debug!(
                "Hostname {} - Connector {} does not apply to {:?} hosts",
                host.hostname,
                connector.id,
                host.host_type
            );
            continue;
        }

        staged.push(StagedConnector {
            connector: connector.clone(),
            forced: false,
        });
    }

    for missing in directives
        .forced
        .iter()
        .chain(directives.included.iter())
        .filter(|id| store.find(id).is_none())
    {
        log::warn!(
            "Hostname {} - Connector {} named in the host directives is not loaded",
            host.hostname,
            missing
        );
    }

    staged
}
