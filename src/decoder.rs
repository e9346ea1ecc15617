// src/decoder.rs
//
// Primitivas de decodificação usadas pelos esquemas de ofuscação dos hosts
// de vídeo, e os próprios esquemas como composições dessas primitivas.

use base64::Engine as _;
use base64::alphabet;
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};
use serde_json::Value;

use crate::error::DecodeError;

/// Marcadores inseridos entre os caracteres do payload para quebrar o base64.
pub const MARKERS: &[&str] = &["@$", "^^", "~@", "%?", "*~", "!!", "#&"];

/// Deslocamento usado pelos esquemas que "empurram" os code points.
pub const SHIFT_OFFSET: u32 = 3;

const LENIENT_B64: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new()
        .with_decode_allow_trailing_bits(true)
        .with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// ROT13 sobre letras ASCII; todo o resto passa intacto.
pub fn rot13(text: &str) -> String {
    text.chars()
        .map(|c| match c {
            'A'..='Z' => (((c as u8 - b'A' + 13) % 26) + b'A') as char,
            'a'..='z' => (((c as u8 - b'a' + 13) % 26) + b'a') as char,
            _ => c,
        })
        .collect()
}

pub fn strip_markers(text: &str) -> String {
    MARKERS
        .iter()
        .fold(text.to_string(), |acc, marker| acc.replace(marker, ""))
}

/// Completa o `=` que falta e decodifica. Alfabeto inválido continua sendo erro.
pub fn decode_base64_with_repair(input: &str) -> Result<Vec<u8>, DecodeError> {
    let mut padded = input.trim().to_string();
    let missing = padded.len() % 4;
    if missing != 0 {
        padded.extend(std::iter::repeat_n('=', 4 - missing));
    }
    Ok(LENIENT_B64.decode(padded.as_bytes())?)
}

pub fn decode_base64_text(input: &str) -> Result<String, DecodeError> {
    Ok(String::from_utf8(decode_base64_with_repair(input)?)?)
}

fn decode_base64_text_lossy(input: &str) -> Result<String, DecodeError> {
    let bytes = decode_base64_with_repair(input)?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

/// Desfaz o deslocamento: subtrai `offset` de cada code point.
pub fn shift_down(text: &str, offset: u32) -> Result<String, DecodeError> {
    text.chars()
        .map(|ch| {
            (ch as u32)
                .checked_sub(offset)
                .and_then(char::from_u32)
                .ok_or(DecodeError::ShiftOutOfRange { ch, offset })
        })
        .collect()
}

pub fn reverse(text: &str) -> String {
    text.chars().rev().collect()
}

/// Resultado final de um esquema: um objeto JSON ou texto livre para busca por regex.
#[derive(Debug, Clone, PartialEq)]
pub enum Decoded {
    Json(serde_json::Map<String, Value>),
    Text(String),
}

impl Decoded {
    fn from_text(text: String) -> Self {
        match serde_json::from_str::<Value>(&text) {
            Ok(Value::Object(map)) => Decoded::Json(map),
            _ => Decoded::Text(text),
        }
    }
}

/// Esquemas de ofuscação conhecidos.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scheme {
    /// Blob base64 atribuído a `a168c`: limpa, decodifica, inverte.
    SchemeA,
    /// Atributo `MKGMa`: rot13, remove `_`, base64, shift, inverte, base64.
    SchemeB,
    /// Array JSON de um elemento em `<script type="application/json">`.
    SchemeJson,
}

impl Scheme {
    pub fn name(self) -> &'static str {
        match self {
            Scheme::SchemeA => "scheme-a",
            Scheme::SchemeB => "scheme-b",
            Scheme::SchemeJson => "scheme-json",
        }
    }

    pub fn decode(self, raw: &str) -> Result<Decoded, DecodeError> {
        let text = match self {
            Scheme::SchemeA => {
                let cleaned = raw.replace('\\', "");
                reverse(&decode_base64_text(&cleaned)?)
            }
            Scheme::SchemeB => {
                let step = rot13(raw).replace('_', "");
                let step = decode_base64_text(&step)?;
                let step = shift_down(&step, SHIFT_OFFSET)?;
                decode_base64_text(&reverse(&step))?
            }
            Scheme::SchemeJson => {
                let obfuscated = match serde_json::from_str::<Value>(raw.trim())? {
                    Value::Array(items) => match items.into_iter().next() {
                        Some(Value::String(s)) => s,
                        _ => return Err(DecodeError::Shape),
                    },
                    _ => return Err(DecodeError::Shape),
                };
                let step = strip_markers(&rot13(&obfuscated));
                let step = decode_base64_text_lossy(&step)?;
                let step = shift_down(&step, SHIFT_OFFSET)?;
                decode_base64_text_lossy(&reverse(&step))?
            }
        };
        Ok(Decoded::from_text(text))
    }
}
