//! Inspect and seed a socialnet database from the command line.

use std::error::Error as _;

use clap::Parser;

use socialnet::config::{Cli, Command, Config};
use socialnet::logging;
use socialnet::service::MessageService;
use socialnet::{slog, Error, Message, MessageId, NewMessage, NewUser, Storage, UserId};

fn main() {
    logging::init();
    let cli = Cli::parse();
    if let Err(error) = run(cli) {
        eprintln!("error: {error}");
        let mut source = error.source();
        while let Some(cause) = source {
            eprintln!("  caused by: {cause}");
            source = cause.source();
        }
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<(), Error> {
    let config = Config::from_cli_and_env(&cli);
    slog!(debug, "socialnet: data dir {}", config.data_dir.display());
    let storage = Storage::open(&config.storage)?;
    let messages = MessageService::new(storage.clone());

    match cli.command {
        Command::AddUser {
            first_name,
            last_name,
            email,
        } => {
            let user = storage.insert_user(&NewUser {
                first_name,
                last_name,
                email,
            })?;
            if config.json {
                println!("{}", serde_json::to_string_pretty(&user)?);
            } else {
                println!("{} {} <{}>", user.id, user.full_name(), user.email);
            }
        }
        Command::Users => {
            let users = storage.list_users()?;
            if config.json {
                println!("{}", serde_json::to_string_pretty(&users)?);
            } else {
                for user in users {
                    println!("{:>6}  {}  <{}>", user.id.0, user.full_name(), user.email);
                }
            }
        }
        Command::Send { from, to, text } => {
            let to: Vec<UserId> = to.into_iter().map(UserId).collect();
            let record = messages.send_message(NewMessage::new(UserId(from), to, text))?;
            println!("sent {}", record.id);
        }
        Command::Reply { from, parent, text } => {
            let record = messages.reply_to(MessageId(parent), UserId(from), &text, None)?;
            println!("sent {} in reply to {}", record.id, MessageId(parent));
        }
        Command::DeleteMessage { id } => {
            messages.delete_message(MessageId(id))?;
            println!("deleted {}", MessageId(id));
        }
        Command::Pages { user1, user2 } => {
            let pages = messages.get_number_of_conversation_pages(UserId(user1), UserId(user2))?;
            println!("{pages}");
        }
        Command::Page { user1, user2, page } => {
            let list = messages.get_conversation_page(UserId(user1), UserId(user2), page)?;
            print_messages(&list, config.json)?;
        }
        Command::Conversation { user1, user2 } => {
            let list = messages.get_conversation(UserId(user1), UserId(user2))?;
            print_messages(&list, config.json)?;
        }
    }
    Ok(())
}

fn print_messages(list: &[Message], json: bool) -> Result<(), Error> {
    if json {
        println!("{}", serde_json::to_string_pretty(list)?);
        return Ok(());
    }
    for m in list {
        let reply = match (&m.reply_of, m.reply_of_id) {
            (Some(parent), _) => format!("  (re: {:?})", parent.text),
            (None, Some(id)) => format!("  (re: {id}, earlier page)"),
            (None, None) => String::new(),
        };
        println!(
            "[{}] {} -> {}: {}{reply}",
            logging::format_millis(m.date),
            m.from.full_name(),
            m.to.first().map(|u| u.full_name()).unwrap_or_default(),
            m.text
        );
    }
    Ok(())
}
