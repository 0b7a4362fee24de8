use mculink_channel::ids;
use mculink_channel::ProtocolEngine;
use mculink_frame::Message;

use crate::cmd::{open_session, resolve_id, LinkArgs, ReadArgs, ValueKind};
use crate::exit::{channel_error, CliError, CliResult, DATA_INVALID, SUCCESS};
use crate::output::{print_reading, to_hex, OutputFormat, Reading, Value};

pub fn run(args: ReadArgs, link: &LinkArgs, format: OutputFormat) -> CliResult<i32> {
    let id = resolve_id(&args.param)?;
    let session = open_session(link)?;

    let value = if args.group {
        let reply = session
            .engine
            .read_group(id)
            .map_err(|err| channel_error("group read failed", err))?;
        decode(&reply, args.kind).ok_or_else(|| {
            CliError::new(
                DATA_INVALID,
                format!("group reply for id {id} does not decode as {:?}", args.kind),
            )
        })?
    } else {
        read_value(&session.engine, id, args.kind)
            .map_err(|err| channel_error("read failed", err))?
    };

    print_reading(
        &Reading {
            id,
            name: ids::param_name(id),
            value: &value,
            sample: None,
        },
        format,
    );
    Ok(SUCCESS)
}

/// Read `id` and decode it as `kind`.
pub fn read_value(
    engine: &ProtocolEngine,
    id: u16,
    kind: ValueKind,
) -> mculink_channel::Result<Value> {
    Ok(match kind {
        ValueKind::U8 => Value::Unsigned(engine.read_u8(id)?.into()),
        ValueKind::U16 => Value::Unsigned(engine.read_u16(id)?.into()),
        ValueKind::U32 => Value::Unsigned(engine.read_u32(id)?),
        ValueKind::F32 => Value::Float(engine.read_f32(id)?),
        ValueKind::String => Value::Text(engine.read_string(id)?),
        ValueKind::Hex => Value::Bytes(to_hex(&engine.read_parameter(id)?.payload)),
    })
}

fn decode(reply: &Message, kind: ValueKind) -> Option<Value> {
    match kind {
        ValueKind::U8 => reply.as_u8().map(|v| Value::Unsigned(v.into())),
        ValueKind::U16 => reply.as_u16().map(|v| Value::Unsigned(v.into())),
        ValueKind::U32 => reply.as_u32().map(Value::Unsigned),
        ValueKind::F32 => reply.as_f32().map(Value::Float),
        ValueKind::String => reply.as_str().map(|s| Value::Text(s.to_owned())),
        ValueKind::Hex => Some(Value::Bytes(to_hex(&reply.payload))),
    }
}

#[cfg(test)]
mod tests {
    use mculink_frame::MessageType;

    use super::*;

    #[test]
    fn decodes_group_replies() {
        let reply = Message::new(MessageType::ReadAck, 510, 32.0f32.to_be_bytes().to_vec());
        assert_eq!(decode(&reply, ValueKind::F32), Some(Value::Float(32.0)));
        assert_eq!(
            decode(&reply, ValueKind::Hex),
            Some(Value::Bytes("42000000".to_string()))
        );
        assert_eq!(decode(&reply, ValueKind::U8), None);
    }
}
