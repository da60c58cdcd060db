// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Parses `repomd.xml`, the top-level index of a yum/dnf repository. */

use kpm_http::{ContentDigest, DigestKind};
use kpm_xml::{Decoder, XmlHandler};
use std::io::Read;

#[derive(Clone, Debug)]
pub struct RepomdEntry {
    pub data_type: String,
    pub location_href: String,
    pub open_checksum: Option<ContentDigest>,
}

#[derive(Default)]
struct RepomdHandler {
    pending_attrs: Vec<(String, String)>,
    entries: Vec<RepomdEntry>,
    current_type: Option<String>,
    current_location: Option<String>,
    current_open_checksum_type: Option<DigestKind>,
    current_open_checksum_hex: Option<String>,
    awaiting_open_checksum_text: bool,
}

fn digest_kind(name: &str) -> Option<DigestKind> {
    match name {
        "sha256" => Some(DigestKind::Sha256),
        "sha1" => Some(DigestKind::Sha1),
        "md5" => Some(DigestKind::Md5),
        _ => None,
    }
}

impl XmlHandler for RepomdHandler {
    fn attr(&mut self, name: &str, value: &str) {
        self.pending_attrs.push((name.to_string(), value.to_string()));
    }

    fn start_tag(&mut self, name: &str) {
        let attrs = std::mem::take(&mut self.pending_attrs);

        match name {
            "data" => {
                self.current_type = attrs
                    .iter()
                    .find(|(k, _)| k == "type")
                    .map(|(_, v)| v.clone());
                self.current_location = None;
                self.current_open_checksum_type = None;
                self.current_open_checksum_hex = None;
            }
            "location" => {
                self.current_location = attrs.iter().find(|(k, _)| k == "href").map(|(_, v)| v.clone());
            }
            "open-checksum" => {
                self.current_open_checksum_type = attrs
                    .iter()
                    .find(|(k, _)| k == "type")
                    .and_then(|(_, v)| digest_kind(v));
                self.awaiting_open_checksum_text = true;
            }
            _ => {
                self.awaiting_open_checksum_text = false;
            }
        }
    }

    fn char_data(&mut self, text: &str) {
        if self.awaiting_open_checksum_text {
            self.current_open_checksum_hex = Some(text.trim().to_string());
        }
    }

    fn end_tag(&mut self, name: &str) {
        if name == "open-checksum" {
            self.awaiting_open_checksum_text = false;
        }

        if name == "data" {
            if let (Some(data_type), Some(location_href)) =
                (self.current_type.take(), self.current_location.take())
            {
                let open_checksum = match (
                    self.current_open_checksum_type.take(),
                    self.current_open_checksum_hex.take(),
                ) {
                    (Some(kind), Some(hex)) => ContentDigest::from_hex(kind, &hex).ok(),
                    _ => None,
                };
                self.entries.push(RepomdEntry {
                    data_type,
                    location_href,
                    open_checksum,
                });
            }
        }
    }
}

pub fn parse(reader: impl Read) -> kpm_xml::Result<Vec<RepomdEntry>> {
    let mut decoder = Decoder::new(reader);
    let mut handler = RepomdHandler::default();
    decoder.parse(&mut handler)?;
    Ok(handler.entries)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_primary_entry_with_open_checksum() {
        let xml = r#"<repomd>
            <data type="primary">
                <checksum type="sha256">ffff</checksum>
                <open-checksum type="sha256">abcd1234</open-checksum>
                <location href="repodata/abcd-primary.xml.gz"/>
            </data>
            <data type="filelists">
                <location href="repodata/other-filelists.xml.gz"/>
            </data>
        </repomd>"#;

        let entries = parse(xml.as_bytes()).unwrap();
        assert_eq!(entries.len(), 2);
        let primary = entries.iter().find(|e| e.data_type == "primary").unwrap();
        assert_eq!(primary.location_href, "repodata/abcd-primary.xml.gz");
        assert_eq!(primary.open_checksum.as_ref().unwrap().hex(), "abcd1234");

        let filelists = entries.iter().find(|e| e.data_type == "filelists").unwrap();
        assert!(filelists.open_checksum.is_none());
    }
}
