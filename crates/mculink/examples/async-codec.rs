//! Drives `McuCodec` over an in-memory async stream: a host task asks for a
//! parameter and a controller task answers it.
//!
//! Run with: `cargo run -p mculink --example async-codec --features async`

use std::error::Error;

use bytes::BytesMut;
use mculink::channel::ids::param;
use mculink::frame::{FrameError, McuCodec, Message, MessageType};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, DuplexStream};
use tokio_util::codec::{Decoder, Encoder};

async fn send<W>(io: &mut W, codec: &mut McuCodec, msg: &Message) -> Result<(), FrameError>
where
    W: AsyncWrite + Unpin,
{
    let mut out = BytesMut::new();
    codec.encode(msg, &mut out)?;
    io.write_all(&out).await?;
    io.flush().await?;
    Ok(())
}

async fn recv<R>(
    io: &mut R,
    codec: &mut McuCodec,
    buf: &mut BytesMut,
) -> Result<Option<Message>, FrameError>
where
    R: AsyncRead + Unpin,
{
    loop {
        if let Some(msg) = codec.decode(buf)? {
            return Ok(Some(msg));
        }
        if io.read_buf(buf).await? == 0 {
            return Ok(None);
        }
    }
}

async fn controller(mut io: DuplexStream) -> Result<(), FrameError> {
    let mut codec = McuCodec::new();
    let mut buf = BytesMut::new();
    while let Some(request) = recv(&mut io, &mut codec, &mut buf).await? {
        if request.kind != MessageType::Read {
            continue;
        }
        let amps = 32.0f32.to_be_bytes().to_vec();
        if let Some(reply) = Message::reply_to(&request, amps) {
            send(&mut io, &mut codec, &reply).await?;
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let (mut host, device) = tokio::io::duplex(256);
    let device_task = tokio::spawn(controller(device));

    let mut codec = McuCodec::new();
    let mut buf = BytesMut::new();
    // Line noise ahead of the request is dropped by the device's decoder.
    host.write_all(&[0x03, 0x11, 0x00]).await?;
    send(&mut host, &mut codec, &Message::read(param::CURRENT_IN_MAXIMUM)).await?;

    match recv(&mut host, &mut codec, &mut buf).await? {
        Some(reply) => println!(
            "param {}: {:?} A",
            reply.identifier,
            reply.as_f32().unwrap_or(f32::NAN)
        ),
        None => println!("controller closed the link"),
    }

    drop(host);
    device_task.await??;
    Ok(())
}
