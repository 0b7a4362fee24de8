use mculink_channel::ids;

use crate::cmd::{open_session, parse_hex, resolve_id, LinkArgs, ValueKind, WriteArgs};
use crate::exit::{channel_error, CliError, CliResult, FAILURE, SUCCESS, USAGE};
use crate::output::{print_ack, to_hex, AckOutput, OutputFormat};

pub fn run(args: WriteArgs, link: &LinkArgs, format: OutputFormat) -> CliResult<i32> {
    let id = resolve_id(&args.param)?;
    let input = args.value.as_str();
    let invalid = || CliError::new(USAGE, format!("{input:?} is not a valid {:?} value", args.kind));

    let value = match args.kind {
        ValueKind::U8 => Typed::U8(input.parse().map_err(|_| invalid())?),
        ValueKind::U16 => Typed::U16(input.parse().map_err(|_| invalid())?),
        ValueKind::U32 => Typed::U32(input.parse().map_err(|_| invalid())?),
        ValueKind::F32 => Typed::F32(input.parse().map_err(|_| invalid())?),
        ValueKind::String => {
            let mut bytes = input.as_bytes().to_vec();
            bytes.push(0);
            Typed::Bytes(bytes)
        }
        ValueKind::Hex => Typed::Bytes(parse_hex(input)?),
    };

    let session = open_session(link)?;
    let engine = &session.engine;
    let ack = match value {
        Typed::U8(v) => engine.write_u8(id, v),
        Typed::U16(v) => engine.write_u16(id, v),
        Typed::U32(v) => engine.write_u32(id, v),
        Typed::F32(v) => engine.write_f32(id, v),
        Typed::Bytes(v) => engine.write_bytes(id, &v),
    }
    .map_err(|err| channel_error("write failed", err))?;
    let code = ack.first().copied();

    print_ack(
        &AckOutput {
            kind: "write",
            id,
            name: ids::param_name(id),
            code,
            payload: to_hex(&ack),
        },
        format,
    );
    Ok(if code.unwrap_or(0) == 0 { SUCCESS } else { FAILURE })
}

enum Typed {
    U8(u8),
    U16(u16),
    U32(u32),
    F32(f32),
    Bytes(Vec<u8>),
}
