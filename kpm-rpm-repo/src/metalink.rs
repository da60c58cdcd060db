// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Extracts mirror resources from a metalink document.

Only the handful of attributes the RPM repo client cares about — protocol
and preference, plus the URL text itself — are collected. Everything else
in a metalink document (hashes, file size, ...) is ignored.
*/

use kpm_xml::{Decoder, XmlHandler};
use std::io::Read;

#[derive(Clone, Debug)]
pub struct MetalinkResource {
    pub protocol: String,
    pub preference: i32,
    pub url: String,
}

#[derive(Default)]
struct MetalinkHandler {
    pending_attrs: Vec<(String, String)>,
    in_url: bool,
    current_protocol: Option<String>,
    current_preference: i32,
    text: String,
    resources: Vec<MetalinkResource>,
}

impl XmlHandler for MetalinkHandler {
    fn attr(&mut self, name: &str, value: &str) {
        self.pending_attrs.push((name.to_string(), value.to_string()));
    }

    fn start_tag(&mut self, name: &str) {
        let attrs = std::mem::take(&mut self.pending_attrs);
        if name == "url" {
            self.in_url = true;
            self.text.clear();
            self.current_protocol = attrs.iter().find(|(k, _)| k == "protocol").map(|(_, v)| v.clone());
            self.current_preference = attrs
                .iter()
                .find(|(k, _)| k == "preference")
                .and_then(|(_, v)| v.parse().ok())
                .unwrap_or(0);
        }
    }

    fn char_data(&mut self, text: &str) {
        if self.in_url {
            self.text.push_str(text);
        }
    }

    fn end_tag(&mut self, name: &str) {
        if name == "url" {
            if let Some(protocol) = self.current_protocol.take() {
                self.resources.push(MetalinkResource {
                    protocol,
                    preference: self.current_preference,
                    url: self.text.trim().to_string(),
                });
            }
            self.in_url = false;
        }
    }
}

/// Collect every `<url>` resource in a metalink document.
pub fn parse_resources(reader: impl Read) -> kpm_xml::Result<Vec<MetalinkResource>> {
    let mut decoder = Decoder::new(reader);
    let mut handler = MetalinkHandler::default();
    decoder.parse(&mut handler)?;
    Ok(handler.resources)
}
