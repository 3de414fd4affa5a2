//! Disk source extraction from a libvirt domain descriptor.
//!
//! The descriptor is the XML returned by `virDomainGetXMLDesc` /
//! `virsh dumpxml`. Only the shape needed here is understood:
//!
//! ```text
//! <domain ...>
//!   <devices>
//!     <disk type='block' device='disk'>
//!       <source dev='/dev/vg0/lv-vm1'/>
//!       <target dev='vda' bus='virtio'/>
//!     </disk>
//!   </devices>
//! </domain>
//! ```

use tracing::{debug, warn};

use crate::error::{BackupError, Result};

/// Attributes tried, in order, for a disk's backing path.
const SOURCE_ATTRS: &[&str] = &["dev", "file"];

/// Backing source paths of every `<disk device='disk'>` entry, in
/// descriptor order.
///
/// Entries whose `device` is something else (`cdrom`, `floppy`, `lun`) are
/// ignored. A disk without a `<source>` element is logged and skipped.
pub fn disk_sources(xml: &str) -> Result<Vec<String>> {
    if !xml.contains("<domain") {
        return Err(BackupError::Descriptor {
            reason: "no <domain> element".to_string(),
        });
    }

    let mut sources = Vec::new();
    for (open_tag, body) in elements(xml, "disk") {
        let attrs = attributes(open_tag);
        let device = attr(&attrs, "device").unwrap_or("disk");
        if device != "disk" {
            debug!(device, "Ignoring non-disk device");
            continue;
        }

        let source = elements(body, "source")
            .next()
            .map(|(tag, _)| attributes(tag))
            .and_then(|attrs| {
                SOURCE_ATTRS
                    .iter()
                    .find_map(|name| attr(&attrs, name))
                    .or_else(|| attrs.first().map(|(_, v)| v.as_str()))
                    .map(str::to_string)
            });

        match source {
            Some(path) if !path.is_empty() => sources.push(path),
            _ => {
                let target = elements(body, "target")
                    .next()
                    .map(|(tag, _)| attributes(tag))
                    .and_then(|a| attr(&a, "dev").map(str::to_string));
                warn!(disk_target = ?target, "Disk has no source; skipping");
            }
        }
    }
    Ok(sources)
}

/// Iterate `(open_tag, body)` for each `<name ...>` element in `xml`.
///
/// `open_tag` excludes the closing `>`; `body` is empty for self-closing
/// elements. Nested elements of the same name are not supported.
fn elements<'a>(xml: &'a str, name: &'a str) -> impl Iterator<Item = (&'a str, &'a str)> + 'a {
    let open = format!("<{name}");
    let close = format!("</{name}>");
    let mut rest = xml;

    std::iter::from_fn(move || {
        loop {
            let start = rest.find(&open)?;
            let after_name = &rest[start + open.len()..];
            // `<disk` must not match `<diskfoo`.
            if !after_name.starts_with(|c: char| c.is_whitespace() || c == '>' || c == '/') {
                rest = after_name;
                continue;
            }

            let tag_end = after_name.find('>')?;
            let open_tag = &rest[start..start + open.len() + tag_end];
            let after_tag = &after_name[tag_end + 1..];

            if open_tag.ends_with('/') {
                rest = after_tag;
                return Some((open_tag.trim_end_matches('/'), ""));
            }

            let (body, next) = match after_tag.find(&close) {
                Some(end) => (&after_tag[..end], &after_tag[end + close.len()..]),
                None => (after_tag, ""),
            };
            rest = next;
            return Some((open_tag, body));
        }
    })
}

/// `name='value'` / `name="value"` pairs of an open tag, entity-decoded.
fn attributes(tag: &str) -> Vec<(String, String)> {
    let mut attrs = Vec::new();
    let mut rest = tag;

    while let Some(eq) = rest.find('=') {
        let name = rest[..eq]
            .trim_end()
            .rsplit(char::is_whitespace)
            .next()
            .unwrap_or_default()
            .to_string();
        let after = rest[eq + 1..].trim_start();
        let quote = match after.chars().next() {
            Some(q @ ('\'' | '"')) => q,
            _ => break,
        };
        let value = &after[1..];
        let Some(end) = value.find(quote) else {
            break;
        };
        attrs.push((name, unescape(&value[..end])));
        rest = &value[end + 1..];
    }
    attrs
}

fn attr<'a>(attrs: &'a [(String, String)], name: &str) -> Option<&'a str> {
    attrs
        .iter()
        .find(|(n, _)| n == name)
        .map(|(_, v)| v.as_str())
}

fn unescape(value: &str) -> String {
    value
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}
