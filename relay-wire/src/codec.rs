//! メッセージのエンコード/デコード
//!
//! 1メッセージを改行終端の1行JSONとして表現します。
//! オブジェクトのキーは常にソート順で出力されるため、同じメッセージは
//! 常に同じバイト列になります。

use crate::{Message, Result, WireError};
use serde_json::{Map, Value};

/// メッセージを改行終端のバイト列にエンコードする
pub fn encode(message: &Message) -> Result<Vec<u8>> {
    let mut object = Map::new();
    object.insert(message.kind().to_string(), message.payload().clone());

    let mut bytes = serde_json::to_vec(&Value::Object(object)).map_err(WireError::Encode)?;
    bytes.push(b'\n');
    Ok(bytes)
}

/// 1行分のバイト列をメッセージにデコードする
///
/// 末尾の改行（`\n` または `\r\n`）は省略可能です。
/// キーが1つだけのJSONオブジェクト以外は `WireError::Malformed` になります。
pub fn decode(bytes: &[u8]) -> Result<Message> {
    let line = trim_line_end(bytes);
    if line.iter().all(u8::is_ascii_whitespace) {
        return Err(WireError::Malformed("empty message".to_string()));
    }

    let value: Value =
        serde_json::from_slice(line).map_err(|e| WireError::Malformed(e.to_string()))?;

    let Value::Object(object) = value else {
        return Err(WireError::Malformed(
            "expected a JSON object with a single key".to_string(),
        ));
    };

    if object.len() != 1 {
        return Err(WireError::Malformed(format!(
            "expected exactly one message kind, found {}",
            object.len()
        )));
    }

    let (kind, payload) = object
        .into_iter()
        .next()
        .ok_or_else(|| WireError::Malformed("missing message kind".to_string()))?;
    Ok(Message::new(kind, payload))
}

fn trim_line_end(bytes: &[u8]) -> &[u8] {
    let bytes = bytes.strip_suffix(b"\n").unwrap_or(bytes);
    bytes.strip_suffix(b"\r").unwrap_or(bytes)
}
