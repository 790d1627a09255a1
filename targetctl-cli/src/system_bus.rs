//! `Bus` implementation on top of a zbus connection to the system bus.

use async_trait::async_trait;
use tracing::trace;
use zbus::Connection;

use targetctl_core::bus::{Bus, BusError, MethodCall};
use targetctl_core::wire::{self, Endian, Payload, Type};

pub struct SystemBus {
    conn: Connection,
}

impl SystemBus {
    pub async fn connect() -> zbus::Result<Self> {
        let conn = Connection::system().await?;
        Ok(Self { conn })
    }
}

/// Manager calls only ever carry plain strings; pull them back out of the
/// encoded argument payload.
fn string_args(args: &Payload) -> Result<Vec<String>, BusError> {
    let types = Type::parse_all(&args.signature).map_err(|e| BusError::Transport(e.to_string()))?;
    let mut reader = args
        .reader()
        .map_err(|e| BusError::Transport(e.to_string()))?;
    let mut out = Vec::with_capacity(types.len());
    for ty in &types {
        if *ty != Type::String {
            return Err(BusError::Transport(format!(
                "unsupported argument type '{}'",
                ty
            )));
        }
        let value = wire::decode(ty, &mut reader).map_err(|e| BusError::Transport(e.to_string()))?;
        out.extend(value.into_string());
    }
    Ok(out)
}

fn map_error(err: zbus::Error) -> BusError {
    match err {
        zbus::Error::MethodError(name, description, _) => BusError::MethodError {
            name: name.to_string(),
            message: description.unwrap_or_default(),
        },
        other => BusError::Transport(other.to_string()),
    }
}

#[async_trait]
impl Bus for SystemBus {
    fn name(&self) -> &'static str {
        "system bus"
    }

    async fn call(&self, call: MethodCall) -> Result<Payload, BusError> {
        trace!(%call, "bus call");
        let args = string_args(&call.args)?;
        let destination = Some(call.destination.as_str());
        let path = call.path.as_str();
        let interface = Some(call.interface.as_str());
        let member = call.member.as_str();

        let reply = match args.as_slice() {
            [] => {
                self.conn
                    .call_method(destination, path, interface, member, &())
                    .await
            }
            [a] => {
                self.conn
                    .call_method(destination, path, interface, member, &(a.as_str(),))
                    .await
            }
            [a, b] => {
                self.conn
                    .call_method(
                        destination,
                        path,
                        interface,
                        member,
                        &(a.as_str(), b.as_str()),
                    )
                    .await
            }
            _ => {
                return Err(BusError::Transport(format!(
                    "{} takes {} arguments, at most 2 are supported",
                    call.member,
                    args.len()
                )));
            }
        }
        .map_err(map_error)?;

        // A reply without a signature header has an empty body.
        let signature = reply
            .body_signature()
            .map(|s| s.as_str().to_string())
            .unwrap_or_default();
        let body = reply.body_as_bytes().map_err(map_error)?.to_vec();
        let endian = Endian::from_flag(reply.primary_header().endian_sig() as u8)
            .unwrap_or_default();
        Ok(Payload {
            signature,
            endian,
            body,
        })
    }
}
