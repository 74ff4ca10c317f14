//! Prompt command dispatch for the client shell.

use chatroom_core::{ChatClient, EntryKind};

const HELP: &str = "\
/register <user> <password>   create an account
/login <user> <password>      sign in
/logout                       sign out
/passwd <old> <new>           change password
/say <text>                   message the room
/msg <user> <text>            private message
/chats [peer]                 show mirrored history
/fetch [peer]                 refetch history from the server
/users                        show the roster
/status                       refresh and show chatroom status
/whoami                       show login and connection info
/quit                         leave";

/// Handle one input line. Returns false when the shell should exit.
pub async fn dispatch(client: &ChatClient, line: &str) -> bool {
    if line.is_empty() {
        return true;
    }
    let mut parts = line.splitn(3, ' ');
    let command = parts.next().unwrap_or_default();

    match command {
        "/help" => println!("{HELP}"),
        "/quit" | "/exit" => return false,
        "/register" => match (parts.next(), parts.next()) {
            (Some(user), Some(password)) => {
                report(client.register(user, password).await, "registered");
            }
            _ => println!("usage: /register <user> <password>"),
        },
        "/login" => match (parts.next(), parts.next()) {
            (Some(user), Some(password)) => {
                report(client.login(user, password).await, "logged in");
            }
            _ => println!("usage: /login <user> <password>"),
        },
        "/logout" => report(client.logout().await, "logged out"),
        "/passwd" => match (parts.next(), parts.next()) {
            (Some(old), Some(new)) => {
                report(client.change_password(old, new).await, "password changed");
            }
            _ => println!("usage: /passwd <old> <new>"),
        },
        "/say" => match rest(line, "/say") {
            Some(text) => report(client.say(None, text).await, "sent"),
            None => println!("usage: /say <text>"),
        },
        "/msg" => match (parts.next(), parts.next()) {
            (Some(user), Some(text)) => report(client.say(Some(user), text).await, "sent"),
            _ => println!("usage: /msg <user> <text>"),
        },
        "/chats" => print_chats(client.get_chats(parts.next())),
        "/fetch" => match client.fetch_chats(parts.next()).await {
            Ok(entries) => print_chats(entries),
            Err(err) => println!("error: {err}"),
        },
        "/users" => {
            for user in client.get_user_info() {
                let state = if user.online { "online" } else { "offline" };
                println!("  {} ({state})", user.name);
            }
        }
        "/status" => match client.fetch_chatroom_status().await {
            Ok(status) => {
                let online = status.users.iter().filter(|u| u.online).count();
                println!(
                    "{} users, {online} online, {} public messages",
                    status.users.len(),
                    status.public_len
                );
            }
            Err(err) => println!("error: {err}"),
        },
        "/whoami" => {
            let info = client.get_server_info();
            match client.get_personal_info() {
                Some(me) => println!("{} @ {}", me.username, me.server_addr),
                None => println!("not logged in"),
            }
            println!(
                "local {} -> server {} ({})",
                info.local_addr,
                info.server_addr,
                if info.connected { "alive" } else { "lost" }
            );
        }
        _ => println!("unknown command; try /help"),
    }
    true
}

fn rest<'a>(line: &'a str, command: &str) -> Option<&'a str> {
    let text = line.strip_prefix(command)?.trim();
    if text.is_empty() {
        None
    } else {
        Some(text)
    }
}

fn report(result: chatroom_core::Result<()>, done: &str) {
    match result {
        Ok(()) => println!("{done}"),
        Err(err) => println!("error: {err}"),
    }
}

fn print_chats(entries: Vec<chatroom_core::ChatEntry>) {
    if entries.is_empty() {
        println!("(no history)");
        return;
    }
    for entry in entries {
        let stamp = entry.timestamp.format("%H:%M:%S");
        match entry.kind {
            EntryKind::Message(text) => println!("[{stamp}] {}: {text}", entry.speaker),
            EntryKind::Online => println!("[{stamp}] * {} came online", entry.speaker),
            EntryKind::Offline => println!("[{stamp}] * {} went offline", entry.speaker),
        }
    }
}
