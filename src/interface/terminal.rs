use crate::{
    client::{ApiClient, ClientError, ConversationManager, Direction, Turn},
    entity::PublicProfile,
};
use regex::Regex;
use std::sync::{Arc, OnceLock};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, Lines};
use tracing::{error, info};

const HELP: &str = "\
Commands:
  /new              start a new conversation
  /list             list conversations
  /select <name>    switch to a conversation
  /delete [name]    delete a conversation (default: the current one)
  /search <term>    find conversations mentioning a term
  /profile          show your profile
  /logout           log out
  /help             show this text
  /quit             exit
Anything else is sent to Jarvis.";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    New,
    List,
    Select(String),
    Delete(Option<String>),
    Search(String),
    Profile,
    Logout,
    Help,
    Quit,
    Say(String),
}

/// Parse one input line. `Ok(None)` for a blank line.
pub fn parse_command(line: &str) -> Result<Option<Command>, String> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    let Some(rest) = line.strip_prefix('/') else {
        return Ok(Some(Command::Say(line.to_string())));
    };

    let (word, arg) = match rest.split_once(char::is_whitespace) {
        Some((word, arg)) => (word, arg.trim()),
        None => (rest, ""),
    };

    let command = match (word.to_lowercase().as_str(), arg) {
        ("new", _) => Command::New,
        ("list", _) => Command::List,
        ("select", "") => return Err("Usage: /select <name>".to_string()),
        ("select", name) => Command::Select(name.to_string()),
        ("delete", "") => Command::Delete(None),
        ("delete", name) => Command::Delete(Some(name.to_string())),
        ("search", term) => Command::Search(term.to_string()),
        ("profile", _) => Command::Profile,
        ("logout", _) => Command::Logout,
        ("help", _) => Command::Help,
        ("quit", _) | ("exit", _) => Command::Quit,
        (other, _) => return Err(format!("Unknown command /{other}. Type /help for commands.")),
    };
    Ok(Some(command))
}

/// Turn the stored reply markup back into plain terminal text.
pub fn render(text: &str) -> String {
    static TAGS: OnceLock<[(Regex, &'static str); 4]> = OnceLock::new();
    let tags = TAGS.get_or_init(|| {
        let rule = |pattern: &str| Regex::new(pattern).expect("render rule must compile");
        [
            (rule(r"<br/>"), "\n"),
            (rule(r"<li>"), "  * "),
            (rule(r"<h3>"), "## "),
            (rule(r"</?[a-z0-9]+>"), ""),
        ]
    });
    tags.iter().fold(text.to_string(), |acc, (regex, replacement)| {
        regex.replace_all(&acc, *replacement).into_owned()
    })
}

/// Interactive chat session over a line-oriented input and output.
pub struct Terminal<R, W> {
    api: Arc<ApiClient>,
    conversations: ConversationManager,
    input: Lines<R>,
    output: W,
    profile: Option<PublicProfile>,
}

impl<R, W> Terminal<R, W>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    pub fn new(api: Arc<ApiClient>, conversations: ConversationManager, input: R, output: W) -> Self {
        Self {
            api,
            conversations,
            input: input.lines(),
            output,
            profile: None,
        }
    }

    async fn say(&mut self, text: &str) -> anyhow::Result<()> {
        self.output.write_all(text.as_bytes()).await?;
        self.output.write_all(b"\n").await?;
        self.output.flush().await?;
        Ok(())
    }

    async fn ask(&mut self, prompt: &str) -> anyhow::Result<Option<String>> {
        self.output.write_all(prompt.as_bytes()).await?;
        self.output.flush().await?;
        Ok(self.input.next_line().await?)
    }

    pub async fn run(&mut self) -> anyhow::Result<()> {
        self.say("Jarvis terminal. Type /help for commands.").await?;

        loop {
            if self.profile.is_none() && !self.authenticate().await? {
                break;
            }

            let prompt = match self.conversations.selected().await {
                Some(name) => format!("[{name}]> "),
                None => "> ".to_string(),
            };
            let Some(line) = self.ask(&prompt).await? else {
                break;
            };

            match parse_command(&line) {
                Ok(Some(Command::Quit)) => break,
                Ok(Some(command)) => self.execute(command).await?,
                Ok(None) => {}
                Err(usage) => self.say(&usage).await?,
            }
        }

        self.say("Bye.").await?;
        Ok(())
    }

    /// Log in or sign up until it works. `false` when input runs out.
    async fn authenticate(&mut self) -> anyhow::Result<bool> {
        loop {
            let Some(choice) = self.ask("Log in or sign up? [l/s]: ").await? else {
                return Ok(false);
            };

            let signing_up = match choice.trim().to_lowercase().as_str() {
                "s" | "signup" | "sign up" => true,
                "l" | "login" | "log in" => false,
                _ => continue,
            };

            let username = if signing_up {
                let Some(username) = self.ask("Username: ").await? else {
                    return Ok(false);
                };
                Some(username.trim().to_string())
            } else {
                None
            };
            let Some(email) = self.ask("Email: ").await? else {
                return Ok(false);
            };
            let Some(password) = self.ask("Password: ").await? else {
                return Ok(false);
            };
            let email = email.trim().to_string();

            if let Some(username) = username {
                if let Err(e) = self.api.signup(&username, &email, &password).await {
                    self.say(&format!("Sign up failed: {e}")).await?;
                    continue;
                }
                self.say("Account created.").await?;
            }

            let login = match self.api.login(&email, &password).await {
                Ok(login) => login,
                Err(e) => {
                    self.say(&format!("Log in failed: {e}")).await?;
                    continue;
                }
            };

            if let Err(e) = self.conversations.reconcile_on_login(login.profile.id).await {
                error!(error = %e, "could not load cached conversations");
                self.api.logout();
                self.say(&format!("Could not load your conversations: {e}")).await?;
                continue;
            }
            let count = self.conversations.conversations().await.len();
            self.say(&format!(
                "Welcome, {}. You have {} saved conversation(s).",
                login.profile.username, count
            ))
            .await?;
            info!(user_id = %login.profile.id, "terminal session started");
            self.profile = Some(login.profile);
            return Ok(true);
        }
    }

    async fn execute(&mut self, command: Command) -> anyhow::Result<()> {
        match command {
            Command::New => {
                let name = self.conversations.create_conversation().await;
                self.say(&format!("Started {name}.")).await?;
            }
            Command::List => self.list(None).await?,
            Command::Select(name) => match self.conversations.select_conversation(&name).await {
                Ok(()) => self.show(&name).await?,
                Err(e) => self.say(&e.to_string()).await?,
            },
            Command::Delete(name) => {
                let target = match name {
                    Some(name) => Some(name),
                    None => self.conversations.selected().await,
                };
                match target {
                    Some(name) => {
                        self.conversations.delete_conversation(&name).await;
                        self.say(&format!("Deleted {name}.")).await?;
                    }
                    None => self.say("No conversation selected.").await?,
                }
            }
            Command::Search(term) => {
                let names = self.conversations.search(&term).await;
                if names.is_empty() {
                    self.say("No matching conversations.").await?;
                } else {
                    self.list(Some(names)).await?;
                }
            }
            Command::Profile => self.show_profile().await?,
            Command::Logout => {
                self.api.logout();
                self.conversations.logout().await;
                self.profile = None;
                self.say("Logged out.").await?;
            }
            Command::Help => self.say(HELP).await?,
            Command::Quit => {}
            Command::Say(text) => self.send(&text).await?,
        }
        Ok(())
    }

    async fn list(&mut self, only: Option<Vec<String>>) -> anyhow::Result<()> {
        let conversations = self.conversations.conversations().await;
        if conversations.is_empty() {
            return self.say("No conversations yet. Type a message or /new.").await;
        }

        let selected = self.conversations.selected().await;
        let mut lines = Vec::new();
        for (name, conversation) in conversations.iter() {
            if only.as_ref().is_some_and(|names| !names.iter().any(|n| n == name)) {
                continue;
            }
            let marker = if selected.as_deref() == Some(name) { "*" } else { " " };
            let waiting = if self.conversations.is_pending(name).await { " (waiting)" } else { "" };
            lines.push(format!(
                "{marker} {name}: {} [{} turns]{waiting}",
                conversation.title(),
                conversation.len()
            ));
        }
        self.say(&lines.join("\n")).await
    }

    async fn show(&mut self, name: &str) -> anyhow::Result<()> {
        let Some(conversation) = self.conversations.conversation(name).await else {
            return Ok(());
        };
        self.say(&format!("-- {name} --")).await?;
        for turn in conversation.turns() {
            self.print_turn(turn).await?;
        }
        Ok(())
    }

    async fn print_turn(&mut self, turn: &Turn) -> anyhow::Result<()> {
        let who = match turn.direction {
            Direction::Sent => "You",
            Direction::Received => "Jarvis",
        };
        let stamp = turn.created_at.format("%Y-%m-%d %H:%M");
        self.say(&format!("{who} ({stamp}): {}", render(&turn.text)))
            .await
    }

    async fn send(&mut self, text: &str) -> anyhow::Result<()> {
        if self.conversations.selected().await.is_none() {
            let name = self.conversations.create_conversation().await;
            self.say(&format!("Started {name}.")).await?;
        }

        self.say("Jarvis is typing...").await?;
        match self.conversations.send_message(text).await {
            Ok(turn) => self.print_turn(&turn).await,
            Err(e @ ClientError::Api { status: 401, .. }) => {
                self.say(&format!("{e} Please log in again.")).await?;
                self.api.logout();
                self.conversations.logout().await;
                self.profile = None;
                Ok(())
            }
            Err(e) if e.is_transient() => {
                self.say(&format!("There was an error while fetching the response: {e} Please try again."))
                    .await
            }
            Err(e) => self.say(&e.to_string()).await,
        }
    }

    async fn show_profile(&mut self) -> anyhow::Result<()> {
        let Some(id) = self.profile.as_ref().map(|p| p.id) else {
            return self.say("Not logged in.").await;
        };
        match self.api.get_profile(id).await {
            Ok(profile) => {
                let text = format!(
                    "Username: {}\nEmail:    {}\nPicture:  {}",
                    profile.username, profile.email, profile.profile_pic
                );
                self.profile = Some(profile);
                self.say(&text).await
            }
            Err(e) => self.say(&format!("Could not load profile: {e}")).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        api::server::tests::spawn_daemon,
        client::{KeyValueStore, MemoryStore},
        manager::tests::ScriptedCompletion,
    };
    use rstest::rstest;
    use std::time::Duration;

    #[rstest]
    #[case("", None)]
    #[case("   ", None)]
    #[case("hello there", Some(Command::Say("hello there".into())))]
    #[case("/new", Some(Command::New))]
    #[case("/LIST", Some(Command::List))]
    #[case("/select Chat 2", Some(Command::Select("Chat 2".into())))]
    #[case("/delete", Some(Command::Delete(None)))]
    #[case("/delete  Chat 1 ", Some(Command::Delete(Some("Chat 1".into()))))]
    #[case("/search", Some(Command::Search(String::new())))]
    #[case("/search rust", Some(Command::Search("rust".into())))]
    #[case("/profile", Some(Command::Profile))]
    #[case("/logout", Some(Command::Logout))]
    #[case("/help", Some(Command::Help))]
    #[case("/quit", Some(Command::Quit))]
    #[case("/exit", Some(Command::Quit))]
    fn parses_commands(#[case] line: &str, #[case] expected: Option<Command>) {
        assert_eq!(parse_command(line).unwrap(), expected);
    }

    #[rstest]
    #[case("/select")]
    #[case("/dance")]
    fn rejects_bad_commands(#[case] line: &str) {
        assert!(parse_command(line).is_err());
    }

    #[test]
    fn renders_markup_as_plain_text() {
        assert_eq!(
            render("<h3>Steps</h3><br/><li><strong>fast</strong></li>"),
            "## Steps\n  * fast"
        );
    }

    #[tokio::test]
    async fn scripted_session() {
        let (url, _dir) = spawn_daemon(ScriptedCompletion::replying("**Sure.**")).await;
        let api = Arc::new(ApiClient::new(&url, Duration::from_secs(5)).unwrap());
        let conversations = ConversationManager::new(api.clone(), Arc::new(MemoryStore::new()));

        let script = "s\nalice\na@x.com\nsecret123\n\
                      who are you\n\
                      /new\n\
                      tell me something\n\
                      /list\n\
                      /search jarvis\n\
                      /profile\n\
                      /quit\n";
        let mut output = Vec::new();
        let mut terminal = Terminal::new(api, conversations, script.as_bytes(), &mut output);
        terminal.run().await.unwrap();
        drop(terminal);

        let output = String::from_utf8(output).unwrap();
        assert!(output.contains("Account created."));
        assert!(output.contains("Welcome, alice. You have 0 saved conversation(s)."));
        assert!(output.contains("Started Chat 1."));
        assert!(output.contains("I am Jarvis, your AI assistant."));
        assert!(output.contains("Started Chat 2."));
        assert!(output.contains("Jarvis ("));
        assert!(output.contains("Sure."));
        assert!(output.contains("  Chat 1: who are you [2 turns]"));
        assert!(output.contains("* Chat 2: tell me something [2 turns]"));
        assert!(output.contains("Username: alice"));
        assert!(output.ends_with("Bye.\n"));
    }

    struct UnreadableStore;

    #[async_trait::async_trait]
    impl KeyValueStore for UnreadableStore {
        async fn get(&self, _key: &str) -> anyhow::Result<Option<String>> {
            anyhow::bail!("permission denied")
        }

        async fn set(&self, _key: &str, _value: &str) -> anyhow::Result<()> {
            Ok(())
        }

        async fn remove(&self, _key: &str) -> anyhow::Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn login_is_refused_when_the_cache_cannot_be_read() {
        let (url, _dir) = spawn_daemon(ScriptedCompletion::replying("unused")).await;
        let api = Arc::new(ApiClient::new(&url, Duration::from_secs(5)).unwrap());
        api.signup("alice", "a@x.com", "secret123").await.unwrap();
        let conversations = ConversationManager::new(api.clone(), Arc::new(UnreadableStore));

        let script = "l\na@x.com\nsecret123\nhello\n";
        let mut output = Vec::new();
        let mut terminal = Terminal::new(api.clone(), conversations, script.as_bytes(), &mut output);
        terminal.run().await.unwrap();
        drop(terminal);

        let output = String::from_utf8(output).unwrap();
        assert!(output.contains("Could not load your conversations"));
        assert!(!output.contains("Welcome, alice."));
        assert!(!api.is_logged_in());
        assert!(output.ends_with("Bye.\n"));
    }
}
