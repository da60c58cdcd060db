// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! A hand-written, event-driven XML decoder.

`primary.xml` documents can run into tens of megabytes; a full-document DOM
or serde deserialization allocates the whole tree just to find one package.
This decoder instead streams tokens to a [XmlHandler] and lets the handler
decide when it has seen enough, at which point [Decoder::parse] stops
pulling further tokens.

This is intentionally not a conformant XML parser: no entity decoding, no
DTD, no namespace resolution beyond treating `:` as a legal name character
so `rpm:entry`-style qualified names pass through untouched.
*/

use std::io::{BufReader, Read};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("unexpected end of document")]
    UnexpectedEof,

    #[error("unexpected character '{0}' at tag position")]
    UnexpectedChar(char),

    #[error("expected '{expected}', found '{found}'")]
    Expected { expected: char, found: char },

    #[error("empty tag or attribute name")]
    EmptyName,
}

pub type Result<T> = std::result::Result<T, Error>;

/// Visitor invoked by [Decoder::parse] as tokens are recognized.
///
/// A handler signals it is finished by returning `true` from [Self::is_done];
/// the decoder checks this between tokens and stops as soon as it does,
/// without needing to consume the rest of the document.
pub trait XmlHandler {
    fn start_tag(&mut self, name: &str) {
        let _ = name;
    }

    fn end_tag(&mut self, name: &str) {
        let _ = name;
    }

    fn attr(&mut self, name: &str, value: &str) {
        let _ = (name, value);
    }

    fn char_data(&mut self, text: &str) {
        let _ = text;
    }

    fn is_done(&self) -> bool {
        false
    }
}

fn is_name_char(c: char) -> bool {
    c.is_ascii_alphabetic() || c == ':' || c == '_' || c == '-'
}

/// Streaming decoder over a byte source.
pub struct Decoder<R: Read> {
    reader: BufReader<R>,
    peeked: Option<u8>,
}

impl<R: Read> Decoder<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader: BufReader::new(reader),
            peeked: None,
        }
    }

    fn getc(&mut self) -> Result<Option<u8>> {
        if let Some(b) = self.peeked.take() {
            return Ok(Some(b));
        }
        let mut buf = [0u8; 1];
        match self.reader.read(&mut buf)? {
            0 => Ok(None),
            _ => Ok(Some(buf[0])),
        }
    }

    fn peekc(&mut self) -> Result<Option<u8>> {
        if self.peeked.is_none() {
            self.peeked = self.getc()?;
        }
        Ok(self.peeked)
    }

    fn eat(&mut self, expected: u8) -> Result<()> {
        match self.getc()? {
            Some(b) if b == expected => Ok(()),
            Some(b) => Err(Error::Expected {
                expected: expected as char,
                found: b as char,
            }),
            None => Err(Error::UnexpectedEof),
        }
    }

    fn skip_space(&mut self) -> Result<()> {
        while let Some(b) = self.peekc()? {
            if b.is_ascii_whitespace() {
                self.peeked = None;
            } else {
                break;
            }
        }
        Ok(())
    }

    fn read_name(&mut self) -> Result<String> {
        let mut name = String::new();
        while let Some(b) = self.peekc()? {
            let c = b as char;
            if is_name_char(c) || (!name.is_empty() && c.is_ascii_digit()) {
                name.push(c);
                self.peeked = None;
            } else {
                break;
            }
        }
        if name.is_empty() {
            Err(Error::EmptyName)
        } else {
            Ok(name)
        }
    }

    /// Read a single- or double-quoted attribute value. No entity decoding.
    fn read_quoted(&mut self) -> Result<String> {
        let quote = self.getc()?.ok_or(Error::UnexpectedEof)?;
        if quote != b'"' && quote != b'\'' {
            return Err(Error::UnexpectedChar(quote as char));
        }
        let mut value = String::new();
        loop {
            let b = self.getc()?.ok_or(Error::UnexpectedEof)?;
            if b == quote {
                break;
            }
            value.push(b as char);
        }
        Ok(value)
    }

    fn skip_until(&mut self, marker: &[u8]) -> Result<()> {
        let mut matched = 0usize;
        loop {
            let b = self.getc()?.ok_or(Error::UnexpectedEof)?;
            if b == marker[matched] {
                matched += 1;
                if matched == marker.len() {
                    return Ok(());
                }
            } else {
                matched = if b == marker[0] { 1 } else { 0 };
            }
        }
    }

    fn handle_tag(&mut self, handler: &mut impl XmlHandler) -> Result<()> {
        match self.peekc()? {
            Some(b'?') => {
                self.peeked = None;
                self.skip_until(b"?>")
            }
            Some(b'/') => {
                self.peeked = None;
                let name = self.read_name()?;
                self.skip_space()?;
                self.eat(b'>')?;
                handler.end_tag(&name);
                Ok(())
            }
            Some(_) => {
                let name = self.read_name()?;
                let mut self_closing = false;

                loop {
                    self.skip_space()?;
                    match self.peekc()? {
                        Some(b'/') => {
                            self.peeked = None;
                            self.eat(b'>')?;
                            self_closing = true;
                            break;
                        }
                        Some(b'>') => {
                            self.peeked = None;
                            break;
                        }
                        Some(_) => {
                            let attr_name = self.read_name()?;
                            self.skip_space()?;
                            self.eat(b'=')?;
                            self.skip_space()?;
                            let value = self.read_quoted()?;
                            handler.attr(&attr_name, &value);
                        }
                        None => return Err(Error::UnexpectedEof),
                    }
                }

                handler.start_tag(&name);
                if self_closing {
                    handler.end_tag(&name);
                }
                Ok(())
            }
            None => Err(Error::UnexpectedEof),
        }
    }

    /// Drive `handler` over the whole document, or until it signals it is
    /// done between tokens.
    pub fn parse(&mut self, handler: &mut impl XmlHandler) -> Result<()> {
        let mut char_data = String::new();

        loop {
            if handler.is_done() {
                return Ok(());
            }

            match self.getc()? {
                None => {
                    if !char_data.trim().is_empty() {
                        handler.char_data(&char_data);
                    }
                    return Ok(());
                }
                Some(b'<') => {
                    if !char_data.is_empty() {
                        handler.char_data(&char_data);
                        char_data.clear();
                    }
                    self.handle_tag(handler)?;
                }
                Some(b) => {
                    char_data.push(b as char);
                }
            }
        }
    }
}
