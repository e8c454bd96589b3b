use std::{sync::Arc, time::Duration};

use anyhow::{bail, Context, Result};
use tokio::io::{AsyncBufReadExt, BufReader};

use crate::{
    backend::{self, InMemoryBackend},
    cli::{Cli, Command},
    domain::{
        self,
        events::Route,
        identity::{AuthContext, UserId},
        message::MessageKind,
        timeline::TimelineUiState,
    },
    infra::{self, error::AppError},
    ui::{
        self,
        render::{badge_line, notice_line, render_timeline, SenderNames},
    },
    usecases::{
        self, bootstrap,
        context::AppContext,
        conversation_session::ConversationSession,
        list_conversations::{list_conversations_or_empty, load_profile},
        send_message::{send_message, SendMessageCommand},
        start_conversation::start_conversation,
        unread_counter::UnreadCounter,
    },
};

const DEMO_FINISHED: &str = "DEMO_FINISHED";
const CHAT_REPL_STOPPED: &str = "CHAT_REPL_STOPPED";
const SETTLE_LIMIT: Duration = Duration::from_secs(2);

pub fn run(cli: Cli) -> Result<()> {
    tracing::debug!(
        ui = ui::module_name(),
        domain = domain::module_name(),
        backend = backend::module_name(),
        usecases = usecases::module_name(),
        infra = infra::module_name(),
        "module boundaries loaded"
    );

    let context = bootstrap::bootstrap(cli.config.as_deref())?;
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(AppError::RuntimeStart)?;

    match cli.command_or_default() {
        Command::Demo => {
            let summary = runtime.block_on(run_demo(&context))?;
            tracing::info!(code = DEMO_FINISHED, summary = ?summary, "demo finished");
        }
        Command::Chat { user, peer } => runtime.block_on(run_chat(&context, &user, &peer))?,
    }

    Ok(())
}

#[derive(Debug, Clone, Copy)]
struct Participant {
    auth: AuthContext,
    user_id: UserId,
}

fn participant(context: &AppContext, username: &str) -> Result<Participant> {
    match context.sign_in(username) {
        AuthContext::SignedIn(identity) => Ok(Participant {
            auth: AuthContext::SignedIn(identity),
            user_id: identity.user_id(),
        }),
        AuthContext::SignedOut => bail!("unknown user `{username}`; add it to [backend] users"),
    }
}

/// What each side ended up seeing in the scripted run.
#[derive(Debug, Clone, PartialEq, Eq)]
struct DemoSummary {
    same_conversation: bool,
    sender_entries: usize,
    failed_sends: usize,
    receiver_unread_before_open: u32,
    receiver_unread_after_open: u32,
}

async fn run_demo(context: &AppContext) -> Result<DemoSummary> {
    let (first, second) = match context.config.backend.users.as_slice() {
        [first, second, ..] => (first.as_str(), second.as_str()),
        _ => bail!("demo needs at least two users in [backend] users"),
    };
    let sender = participant(context, first)?;
    let receiver = participant(context, second)?;
    let backend = Arc::clone(&context.backend);

    let conversation_id =
        start_conversation(backend.as_ref(), &sender.auth, receiver.user_id).await?;
    let reverse = start_conversation(backend.as_ref(), &receiver.auth, sender.user_id).await?;
    println!("{first} and {second} share conversation {conversation_id}");

    let mut receiver_badge =
        UnreadCounter::new(Arc::clone(&backend), context.config.chat.badge_ceiling);
    receiver_badge.set_auth(&receiver.auth).await;

    let session = ConversationSession::open(Arc::clone(&backend), &sender.auth, conversation_id).await?;
    let names = SenderNames::new(Some(sender.user_id)).with_name(receiver.user_id, second);

    let pending = session.begin_send(&sender.auth, "Hi! Is the ladder still free on Saturday?")?;
    print_timeline(first, &session, &names);
    pending.complete().await?;
    session
        .begin_send_kind(&sender.auth, "Saturday 10:00, ladder pickup", MessageKind::BookingRequest)?
        .complete()
        .await?;

    backend.fail_next_inserts(1);
    if let Err(error) = session.send(&sender.auth, "Thanks so much!").await {
        println!("send failed: {error}");
    }
    let notices = session.drain_notices();
    for notice in &notices {
        println!("{}", notice_line(notice));
    }
    print_timeline(first, &session, &names);

    let receiver_unread_before_open = wait_for_badge(&receiver_badge, 2).await;
    println!("{second}: {}", badge_line(&receiver_badge.badge()));

    let reply_session =
        ConversationSession::open(Arc::clone(&backend), &receiver.auth, conversation_id).await?;
    receiver_badge
        .route_changed(Route::new(format!("/messages/{conversation_id}")))
        .await;
    reply_session
        .send(&receiver.auth, "Yes, come by any time after nine.")
        .await?;
    let reply_names = SenderNames::new(Some(receiver.user_id)).with_name(sender.user_id, first);
    print_timeline(second, &reply_session, &reply_names);

    let receiver_unread_after_open = wait_for_badge(&receiver_badge, 0).await;
    println!("{second}: {}", badge_line(&receiver_badge.badge()));

    let sender_entries = wait_for_entries(&session, 3).await;
    print_timeline(first, &session, &names);

    for summary in list_conversations_or_empty(backend.as_ref(), &receiver.auth).await {
        let other = summary
            .other_user
            .map(|profile| profile.display_name())
            .unwrap_or_else(|| "unknown".to_owned());
        println!("{second} chats with {other} in {}", summary.conversation_id);
    }

    session.close().await;
    reply_session.close().await;
    receiver_badge.close().await;

    Ok(DemoSummary {
        same_conversation: conversation_id == reverse,
        sender_entries,
        failed_sends: notices.len(),
        receiver_unread_before_open,
        receiver_unread_after_open,
    })
}

/// One line of REPL input.
#[derive(Debug, Clone, PartialEq, Eq)]
enum ChatInput {
    Send(String),
    Booking(String),
    Peer(String),
    FailNext,
    Unread,
    List,
    Help,
    Quit,
}

impl ChatInput {
    fn parse(line: &str) -> Self {
        let line = line.trim_end_matches(['\r', '\n']);
        let (command, rest) = match line.split_once(' ') {
            Some((command, rest)) => (command, rest.to_owned()),
            None => (line, String::new()),
        };

        match command {
            "/quit" | "/exit" => Self::Quit,
            "/fail" => Self::FailNext,
            "/unread" => Self::Unread,
            "/list" => Self::List,
            "/help" => Self::Help,
            "/peer" => Self::Peer(rest),
            "/book" => Self::Booking(rest),
            _ => Self::Send(line.to_owned()),
        }
    }
}

const CHAT_HELP: &str = "type to send; /book TEXT booking request, /peer TEXT reply as the other user, \
/fail fail next send, /unread badge, /list conversations, /quit";

async fn run_chat(context: &AppContext, user: &str, peer: &str) -> Result<()> {
    let me = participant(context, user)?;
    let other = participant(context, peer)?;
    let backend = Arc::clone(&context.backend);

    let conversation_id = start_conversation(backend.as_ref(), &me.auth, other.user_id).await?;
    let session = ConversationSession::open(Arc::clone(&backend), &me.auth, conversation_id).await?;
    let mut counter = UnreadCounter::new(Arc::clone(&backend), context.config.chat.badge_ceiling);
    counter.set_auth(&me.auth).await;
    counter
        .route_changed(Route::new(format!("/messages/{conversation_id}")))
        .await;

    let peer_name = load_profile(backend.as_ref(), other.user_id)
        .await
        .map(|profile| profile.display_name())
        .unwrap_or_else(|| peer.to_owned());
    let names = SenderNames::new(Some(me.user_id)).with_name(other.user_id, peer_name);

    println!("{user} ↔ {peer} in conversation {}", session.conversation_id());
    println!("{CHAT_HELP}");
    print_timeline(user, &session, &names);

    let mut updates = session.updates();
    let _ = updates.borrow_and_update();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            changed = updates.changed() => {
                if changed.is_err() {
                    break;
                }
                let _ = updates.borrow_and_update();
                print_timeline(user, &session, &names);
                for notice in session.drain_notices() {
                    println!("{}", notice_line(&notice));
                }
            }
            line = lines.next_line() => {
                let Some(line) = line.context("failed to read from stdin")? else {
                    break;
                };

                match ChatInput::parse(&line) {
                    ChatInput::Quit => break,
                    ChatInput::Help => println!("{CHAT_HELP}"),
                    ChatInput::FailNext => {
                        backend.fail_next_inserts(1);
                        println!("the next send will fail");
                    }
                    ChatInput::Unread => {
                        counter.refresh().await;
                        println!("{}", badge_line(&counter.badge()));
                    }
                    ChatInput::List => {
                        for summary in list_conversations_or_empty(backend.as_ref(), &me.auth).await {
                            let name = summary
                                .other_user
                                .map(|profile| profile.display_name())
                                .unwrap_or_else(|| "unknown".to_owned());
                            println!("{name}  {}", summary.conversation_id);
                        }
                    }
                    ChatInput::Peer(text) => {
                        let command = SendMessageCommand::text(conversation_id, text);
                        if let Err(error) = send_message(backend.as_ref(), &other.auth, command).await {
                            println!("{peer} could not send: {error}");
                        }
                    }
                    ChatInput::Booking(text) => {
                        send_from_repl(&session, &me.auth, &text, MessageKind::BookingRequest).await;
                    }
                    ChatInput::Send(text) => {
                        send_from_repl(&session, &me.auth, &text, MessageKind::Text).await;
                    }
                }
            }
        }
    }

    session.close().await;
    counter.close().await;
    tracing::info!(code = CHAT_REPL_STOPPED, "chat session ended");
    Ok(())
}

async fn send_from_repl(
    session: &ConversationSession<InMemoryBackend>,
    auth: &AuthContext,
    text: &str,
    kind: MessageKind,
) {
    match session.begin_send_kind(auth, text, kind) {
        // failures surface as notices through the update stream
        Ok(pending) => {
            let _ = pending.complete().await;
        }
        Err(error) if error.is_precondition() => {}
        Err(error) => println!("! {error}"),
    }
}

fn print_timeline(
    title: &str,
    session: &ConversationSession<InMemoryBackend>,
    names: &SenderNames,
) {
    println!(
        "{}",
        timeline_header(title, session.ui_state(), session.pending_count())
    );
    for line in render_timeline(&session.entries(), names) {
        println!("{line}");
    }
}

fn timeline_header(title: &str, state: TimelineUiState, pending: usize) -> String {
    let mut header = format!("── {title} ──");
    if state == TimelineUiState::Loading {
        header.push_str(" loading");
    }
    if pending > 0 {
        header.push_str(&format!(" ({pending} sending)"));
    }
    header
}

async fn wait_for_badge(counter: &UnreadCounter<InMemoryBackend>, expected: u32) -> u32 {
    let mut badge = counter.subscribe_badge();
    let _ = tokio::time::timeout(SETTLE_LIMIT, badge.wait_for(|badge| badge.count() == expected)).await;
    counter.badge().count()
}

async fn wait_for_entries(session: &ConversationSession<InMemoryBackend>, expected: usize) -> usize {
    let mut updates = session.updates();
    let _ = tokio::time::timeout(SETTLE_LIMIT, async {
        while session.entries().len() < expected {
            if updates.changed().await.is_err() {
                break;
            }
        }
    })
    .await;
    session.entries().len()
}
