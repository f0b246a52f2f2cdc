use std::{
    io::{Read, Write},
    path::Path,
};

use {anyhow::Context, parley_whatsapp_business::WebhookPayload};

pub fn handle_decode(file: &Path) -> anyhow::Result<()> {
    let body = if file == Path::new("-") {
        let mut buf = Vec::new();
        std::io::stdin()
            .read_to_end(&mut buf)
            .context("reading stdin")?;
        buf
    } else {
        std::fs::read(file).with_context(|| format!("reading {}", file.display()))?
    };

    let mut stdout = std::io::stdout().lock();
    for line in decode_lines(&body)? {
        writeln!(stdout, "{line}")?;
    }
    Ok(())
}

/// One JSON document per decoded event, in delivery order.
fn decode_lines(body: &[u8]) -> anyhow::Result<Vec<String>> {
    let payload = WebhookPayload::from_slice(body)?;
    if !payload.is_whatsapp_business() {
        anyhow::bail!("not a WhatsApp Business delivery: {:?}", payload.object);
    }
    payload
        .events()
        .map(|event| serde_json::to_string(&event).map_err(Into::into))
        .collect()
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, serde_json::Value};

    #[test]
    fn prints_one_line_per_message() {
        let body = serde_json::json!({
            "object": "whatsapp_business_account",
            "entry": [{ "changes": [{ "field": "messages", "value": {
                "messages": [
                    { "from": "1555", "id": "wamid.1", "type": "text", "text": { "body": "hi" } },
                    { "from": "1555", "id": "wamid.2", "type": "image", "image": { "id": "m1" } }
                ]
            } }] }]
        });
        let lines = decode_lines(body.to_string().as_bytes()).unwrap();
        assert_eq!(lines.len(), 2);
        let first: Value = serde_json::from_str(&lines[0]).unwrap();
        assert_eq!(first["content"], "hi");
        let second: Value = serde_json::from_str(&lines[1]).unwrap();
        assert_eq!(second["kind"], "image");
        assert_eq!(second["media_id"], "m1");
    }

    #[test]
    fn foreign_objects_are_rejected() {
        let err = decode_lines(br#"{"object":"page","entry":[]}"#).unwrap_err();
        assert!(err.to_string().contains("page"));
    }

    #[test]
    fn reads_delivery_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(br#"{"object":"whatsapp_business_account","entry":[]}"#)
            .unwrap();
        handle_decode(file.path()).unwrap();
    }
}
