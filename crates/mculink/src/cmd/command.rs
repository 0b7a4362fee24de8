use mculink_channel::ids;

use crate::cmd::{open_session, parse_hex, resolve_id, CommandArgs, LinkArgs};
use crate::exit::{channel_error, CliResult, FAILURE, SUCCESS};
use crate::output::{print_ack, to_hex, AckOutput, OutputFormat};

pub fn run(args: CommandArgs, link: &LinkArgs, format: OutputFormat) -> CliResult<i32> {
    let id = resolve_id(&args.command)?;
    let extra = args.args.as_deref().map(parse_hex).transpose()?;
    let session = open_session(link)?;

    let ack = match extra {
        Some(bytes) => session.engine.send_command_with(id, &bytes),
        None => session.engine.send_command(id),
    }
    .map_err(|err| channel_error("command failed", err))?;
    let code = ack.first().copied();

    print_ack(
        &AckOutput {
            kind: "command",
            id,
            name: ids::command_name(id),
            code,
            payload: to_hex(&ack),
        },
        format,
    );
    Ok(if code.unwrap_or(0) == 0 { SUCCESS } else { FAILURE })
}
