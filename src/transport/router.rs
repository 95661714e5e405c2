use std::str::FromStr;

use kometa_error::{KometaResult, StatusCode, TransportError};
use strum_macros::{AsRefStr, EnumString};
use tracing::debug;

use super::{files::StaticFiles, CommandContext, Reply};
use crate::{channel::Operation, hub::HubHandle};

/// Команды, общие для всех транспортов.
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumString, AsRefStr)]
#[strum(serialize_all = "lowercase")]
pub enum Command {
    Ping,
    Subscribe,
    AddChannels,
    RemoveChannels,
    Data,
    Create,
    Update,
    Clear,
}

/// Выполняет команду `command` и отвечает через `ctx`.
///
/// Имя, не совпадающее ни с одной командой, трактуется как имя статического
/// файла. Ошибки hub и каналов возвращаются транспорту.
pub async fn route<C>(
    hub: &HubHandle,
    files: Option<&StaticFiles>,
    command: &str,
    ctx: &mut C,
) -> KometaResult<()>
where
    C: CommandContext + ?Sized,
{
    let Ok(cmd) = Command::from_str(command) else {
        return serve_file(files, command, ctx).await;
    };
    debug!(command = cmd.as_ref(), "Routing command");

    match cmd {
        Command::Ping => ctx.respond(Reply::Text("pong".to_string())).await,
        Command::Subscribe => {
            let channels = split_channels(ctx.param("channels").as_deref());
            let subscription = hub.subscribe(channels).await?;
            ctx.respond(Reply::Subscribed {
                subscriber_id: subscription.id,
            })
            .await
        }
        Command::AddChannels | Command::RemoveChannels => {
            let id = ctx.param("id").unwrap_or_default();
            let channels = split_channels(ctx.param("channels").as_deref());
            let result = if cmd == Command::AddChannels {
                hub.add_channels(&id, channels).await
            } else {
                hub.remove_channels(&id, channels).await
            };
            // Неизвестный подписчик: пустая строка вместо идентификатора.
            let echoed = match result {
                Ok(()) => id,
                Err(e) if e.status_code() == StatusCode::SubscriberNotFound => String::new(),
                Err(e) => return Err(e),
            };
            ctx.respond(Reply::Text(echoed)).await
        }
        Command::Data => {
            let id = ctx.param("id").unwrap_or_default();
            let response = hub.poll(&id).await?;
            ctx.respond(Reply::Data(response)).await
        }
        Command::Create | Command::Update | Command::Clear => {
            let operation = match cmd {
                Command::Create => Operation::Create,
                Command::Update => Operation::Update,
                _ => Operation::Clear,
            };
            let channel = ctx.param("channel").unwrap_or_default();
            let data = if operation == Operation::Clear {
                String::new()
            } else {
                ctx.param("data").unwrap_or_default()
            };
            hub.apply(operation, &channel, data).await?;
            ctx.respond(Reply::Empty).await
        }
    }
}

async fn serve_file<C>(
    files: Option<&StaticFiles>,
    name: &str,
    ctx: &mut C,
) -> KometaResult<()>
where
    C: CommandContext + ?Sized,
{
    let Some(files) = files else {
        return Err(TransportError::UnknownCommand {
            command: name.to_string(),
        }
        .into());
    };
    match files.load(name).await? {
        Some(bytes) => {
            ctx.respond(Reply::File {
                name: name.to_string(),
                bytes,
            })
            .await
        }
        None => ctx.respond(Reply::NotFound).await,
    }
}

/// Разбирает список каналов через запятую.
///
/// Имена не обрезаются; пустые и состоящие из пробелов отбрасываются.
pub fn split_channels(raw: Option<&str>) -> Vec<String> {
    raw.unwrap_or_default()
        .split(',')
        .filter(|name| !name.trim().is_empty())
        .map(str::to_string)
        .collect()
}

////////////////////////////////////////////////////////////////////////////////
// Тесты
////////////////////////////////////////////////////////////////////////////////
