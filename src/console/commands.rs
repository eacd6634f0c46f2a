use tracing::{error, info};

use super::{Console, Reply};
use crate::auth::{AuthorizedKey, Permission, GUEST_NAME};

pub(super) const HELP: &[&str] = &[
    "repo list                      - List all repositories",
    "repo create <name>             - Create a repository",
    "repo delete <name>             - Delete a repository",
    "repo adduser <repo> <user> <r|rw> - Add user to repository (r=read, rw=read-write)",
    "repo deluser <repo> <user>     - Remove user from repository",
    "user list                      - List all users",
    "user create <name>             - Create a user",
    "user delete <name>             - Delete a user",
    "user addkey <name> <pubkey>    - Add SSH key to user",
    "user delkey <name> <fingerprint> - Remove SSH key from user",
    "user keys <name>               - List user's SSH keys",
    "help                           - Show this help",
    "quit                           - Exit",
    "",
    "Note: \"guest\" is a built-in user for read-only access. Add guest to a repo",
    "      with \"repo adduser <repo> guest r\" to allow anyone to read that",
    "      repository.",
];

impl Console {
    /// Run one trimmed, non-empty command line.
    pub async fn execute(&self, line: &str) -> Reply {
        let args: Vec<&str> = line.split_whitespace().collect();
        let Some((cmd, rest)) = args.split_first() else {
            return Reply::default();
        };

        match *cmd {
            "help" | "h" => Reply {
                lines: HELP.iter().map(|s| s.to_string()).collect(),
                quit: false,
            },
            "quit" | "exit" | "q" => Reply {
                lines: vec!["Bye!".to_string()],
                quit: true,
            },
            "repo" => self.repo(rest).await,
            "user" => self.user(rest).await,
            other => Reply::line(format!("Unknown command: {other}")),
        }
    }

    async fn repo(&self, args: &[&str]) -> Reply {
        match args {
            [] => Reply::line("Usage: repo <list|create|delete|adduser|deluser>"),
            ["list", ..] => {
                let repos = self.repos.list().await;
                if repos.is_empty() {
                    return Reply::line("  (no repositories)");
                }
                let mut reply = Reply::default();
                for repo in repos {
                    let grants: Vec<String> = repo
                        .users
                        .iter()
                        .filter_map(|(user, perm)| perm.as_short().map(|p| format!("{user}({p})")))
                        .collect();
                    if grants.is_empty() {
                        reply.push(format!("  {}", repo.name));
                    } else {
                        reply.push(format!("  {} [{}]", repo.name, grants.join(", ")));
                    }
                }
                reply
            }
            ["create"] => Reply::line("Usage: repo create <name>"),
            ["create", name, ..] => match self.repos.create(name).await {
                Ok(_) => self.saved(format!("Repository {name} created")).await,
                Err(e) => Reply::line(format!("Error: {e}")),
            },
            ["delete"] => Reply::line("Usage: repo delete <name>"),
            ["delete", name, ..] => match self.repos.delete(name).await {
                Ok(()) => self.saved(format!("Repository {name} deleted")).await,
                Err(e) => Reply::line(format!("Error: {e}")),
            },
            ["adduser", repo, user, perm, ..] => {
                let perm = match Permission::parse_short(perm) {
                    Some(Permission::Write) if *user == GUEST_NAME => {
                        return Reply::line("Guest user can only have read permission");
                    }
                    Some(perm) => perm,
                    None => return Reply::line("Permission must be r or rw"),
                };
                if *user != GUEST_NAME && !self.identities.user_exists(user) {
                    return Reply::line("User not found");
                }
                match self.repos.add_user(repo, user, perm).await {
                    Ok(()) => self.saved("User added").await,
                    Err(e) => Reply::line(format!("Error: {e}")),
                }
            }
            ["adduser", ..] => Reply::line("Usage: repo adduser <repo> <user> <r|rw>"),
            ["deluser", repo, user, ..] => match self.repos.remove_user(repo, user).await {
                Ok(()) => self.saved("User removed").await,
                Err(e) => Reply::line(format!("Error: {e}")),
            },
            ["deluser", ..] => Reply::line("Usage: repo deluser <repo> <user>"),
            _ => Reply::line("Unknown repo subcommand"),
        }
    }

    async fn user(&self, args: &[&str]) -> Reply {
        match args {
            [] => Reply::line("Usage: user <list|create|delete|addkey|delkey|keys>"),
            ["list", ..] => {
                let users = self.identities.list_users();
                if users.is_empty() {
                    return Reply::line("  (no users)");
                }
                Reply {
                    lines: users
                        .iter()
                        .map(|u| format!("  {} ({} keys)", u.name, u.keys.len()))
                        .collect(),
                    quit: false,
                }
            }
            ["create"] => Reply::line("Usage: user create <name>"),
            ["create", name, ..] => {
                if *name == GUEST_NAME {
                    return Reply::line("Cannot create user named guest");
                }
                match self.identities.create_user(name) {
                    Ok(()) => self.saved(format!("User {name} created")).await,
                    Err(e) => Reply::line(format!("Error: {e}")),
                }
            }
            ["delete"] => Reply::line("Usage: user delete <name>"),
            ["delete", name, ..] => {
                if *name == GUEST_NAME {
                    return Reply::line("Cannot delete guest user");
                }
                if let Err(e) = self.identities.delete_user(name) {
                    return Reply::line(format!("Error: {e}"));
                }
                let grants = self.repos.remove_user_everywhere(name).await;
                info!(user = %name, grants, "user deleted");
                self.saved(format!("User {name} deleted")).await
            }
            ["addkey", name, key @ ..] if !key.is_empty() => {
                let key = match AuthorizedKey::parse(&key.join(" ")) {
                    Ok(key) => key,
                    Err(e) => return Reply::line(format!("Invalid public key: {e}")),
                };
                match self.identities.add_key_to_user(name, key) {
                    Ok(()) => self.saved("Key added").await,
                    Err(e) => Reply::line(format!("Error: {e}")),
                }
            }
            ["addkey", ..] => Reply::line("Usage: user addkey <name> <pubkey>"),
            ["delkey", name, fingerprint, ..] => {
                match self.identities.remove_key_from_user(name, fingerprint) {
                    Ok(()) => self.saved("Key removed").await,
                    Err(e) => Reply::line(format!("Error: {e}")),
                }
            }
            ["delkey", ..] => Reply::line("Usage: user delkey <name> <fingerprint>"),
            ["keys"] => Reply::line("Usage: user keys <name>"),
            ["keys", name, ..] => match self.identities.get_user(name) {
                None => Reply::line("User not found"),
                Some(user) if user.keys.is_empty() => Reply::line("  (no keys)"),
                Some(user) => Reply {
                    lines: user
                        .keys
                        .iter()
                        .map(|k| format!("  {}", k.fingerprint()))
                        .collect(),
                    quit: false,
                },
            },
            _ => Reply::line("Unknown user subcommand"),
        }
    }

    /// Persist both tables after a successful mutation.  The mutation stands
    /// even if the write fails; the operator is told.
    async fn saved(&self, message: impl Into<String>) -> Reply {
        let mut reply = Reply::line(message);
        if let Err(e) = self.data.save_tables(&self.identities, &self.repos).await {
            error!(error = %format!("{e:#}"), "failed to persist tables");
            reply.push(format!("Failed to save data: {e:#}"));
        }
        reply
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::auth::keys::tests::{test_key, test_key_line};
    use crate::auth::IdentityStore;
    use crate::repo::table::tests::table;
    use crate::storage::{load_repos, load_users, DataDir};

    struct Fixture {
        tmp: tempfile::TempDir,
        console: Console,
    }

    impl Fixture {
        async fn run(&self, line: &str) -> Vec<String> {
            self.console.execute(line).await.lines
        }

        fn data(&self) -> DataDir {
            DataDir::new(self.tmp.path())
        }
    }

    fn fixture() -> Fixture {
        let tmp = tempfile::tempdir().unwrap();
        let data = DataDir::new(tmp.path());
        let repos = Arc::new(table(&data.repos_dir()));
        let console = Console::new(Arc::new(IdentityStore::new()), repos, data);
        Fixture { tmp, console }
    }

    #[tokio::test]
    async fn help_and_quit() {
        let f = fixture();
        let help = f.console.execute("h").await;
        assert!(!help.quit);
        assert!(help.lines.iter().any(|l| l.starts_with("user delkey")));

        for cmd in ["quit", "exit", "q"] {
            let reply = f.console.execute(cmd).await;
            assert!(reply.quit);
            assert_eq!(reply.lines, vec!["Bye!"]);
        }
    }

    #[tokio::test]
    async fn unknown_commands() {
        let f = fixture();
        assert_eq!(f.run("frobnicate now").await, vec!["Unknown command: frobnicate"]);
        assert_eq!(f.run("repo rename a b").await, vec!["Unknown repo subcommand"]);
        assert_eq!(f.run("user purge").await, vec!["Unknown user subcommand"]);
    }

    #[tokio::test]
    async fn usage_on_missing_arguments() {
        let f = fixture();
        assert_eq!(
            f.run("repo").await,
            vec!["Usage: repo <list|create|delete|adduser|deluser>"]
        );
        assert_eq!(f.run("repo create").await, vec!["Usage: repo create <name>"]);
        assert_eq!(
            f.run("repo adduser p alice").await,
            vec!["Usage: repo adduser <repo> <user> <r|rw>"]
        );
        assert_eq!(f.run("user addkey alice").await, vec!["Usage: user addkey <name> <pubkey>"]);
        assert_eq!(f.run("user keys").await, vec!["Usage: user keys <name>"]);
    }

    #[tokio::test]
    async fn repo_lifecycle_is_persisted() {
        let f = fixture();
        assert_eq!(f.run("repo list").await, vec!["  (no repositories)"]);
        assert_eq!(f.run("repo create proj").await, vec!["Repository proj created"]);
        assert_eq!(f.run("user create alice").await, vec!["User alice created"]);
        assert_eq!(f.run("repo adduser proj alice rw").await, vec!["User added"]);
        assert_eq!(f.run("repo adduser proj guest r").await, vec!["User added"]);
        assert_eq!(
            f.run("repo list").await,
            vec!["  proj [alice(rw), guest(r)]"]
        );

        let records = load_repos(&f.data().repos_file()).unwrap().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].users.get("alice").map(String::as_str), Some("rw"));

        assert_eq!(f.run("repo deluser proj alice").await, vec!["User removed"]);
        assert_eq!(f.run("repo list").await, vec!["  proj [guest(r)]"]);
        assert_eq!(f.run("repo delete proj").await, vec!["Repository proj deleted"]);
        assert!(load_repos(&f.data().repos_file()).unwrap().unwrap().is_empty());
    }

    #[tokio::test]
    async fn repo_errors_are_reported() {
        let f = fixture();
        f.run("repo create proj").await;
        assert_eq!(
            f.run("repo create proj").await,
            vec!["Error: repository proj already exists"]
        );
        assert_eq!(
            f.run("repo delete ghost").await,
            vec!["Error: repository ghost does not exist"]
        );
    }

    #[tokio::test]
    async fn adduser_validation() {
        let f = fixture();
        f.run("repo create proj").await;
        f.run("user create alice").await;

        assert_eq!(
            f.run("repo adduser proj guest rw").await,
            vec!["Guest user can only have read permission"]
        );
        assert_eq!(
            f.run("repo adduser proj alice x").await,
            vec!["Permission must be r or rw"]
        );
        assert_eq!(f.run("repo adduser proj bob r").await, vec!["User not found"]);
        assert_eq!(
            f.run("repo adduser nope alice r").await,
            vec!["Error: repository nope does not exist"]
        );
    }

    #[tokio::test]
    async fn guest_is_reserved() {
        let f = fixture();
        assert_eq!(f.run("user create guest").await, vec!["Cannot create user named guest"]);
        assert_eq!(f.run("user delete guest").await, vec!["Cannot delete guest user"]);
        assert_eq!(
            f.run("user create admin").await,
            vec!["Error: cannot create user named 'admin'"]
        );
    }

    #[tokio::test]
    async fn key_management() {
        let f = fixture();
        f.run("user create alice").await;
        assert_eq!(f.run("user keys alice").await, vec!["  (no keys)"]);

        let line = format!("user addkey alice {}", test_key_line(7, "alice laptop"));
        assert_eq!(f.run(&line).await, vec!["Key added"]);
        assert_eq!(
            f.run(&line).await,
            vec!["Error: key already exists"]
        );
        let fingerprint = test_key(7).fingerprint();
        assert_eq!(f.run("user keys alice").await, vec![format!("  {fingerprint}")]);
        assert_eq!(f.run("user list").await, vec!["  alice (1 keys)"]);

        let users = load_users(&f.data().users_file()).unwrap().unwrap();
        assert_eq!(users[0].keys.len(), 1);

        assert_eq!(
            f.run(&format!("user delkey alice {fingerprint}")).await,
            vec!["Key removed"]
        );
        assert_eq!(
            f.run(&format!("user delkey alice {fingerprint}")).await,
            vec!["Error: key not found"]
        );
    }

    #[tokio::test]
    async fn invalid_key_is_rejected() {
        let f = fixture();
        f.run("user create alice").await;
        let reply = f.run("user addkey alice ssh-ed25519 !!!notbase64").await;
        assert_eq!(reply.len(), 1);
        assert!(reply[0].starts_with("Invalid public key: "));
        assert_eq!(f.run("user keys bob").await, vec!["User not found"]);
    }

    #[tokio::test]
    async fn deleting_user_revokes_grants() {
        let f = fixture();
        f.run("repo create proj").await;
        f.run("user create alice").await;
        f.run("repo adduser proj alice rw").await;

        assert_eq!(f.run("user delete alice").await, vec!["User alice deleted"]);
        assert_eq!(f.run("repo list").await, vec!["  proj"]);
        assert_eq!(f.run("user list").await, vec!["  (no users)"]);
        assert_eq!(
            f.run("user delete alice").await,
            vec!["Error: user alice does not exist"]
        );
    }

    #[tokio::test]
    async fn save_failure_is_reported_but_change_stands() {
        let f = fixture();
        std::fs::create_dir(f.data().users_file()).unwrap();

        let reply = f.run("user create alice").await;
        assert_eq!(reply[0], "User alice created");
        assert!(reply[1].starts_with("Failed to save data: "));
        assert!(f.console.identities.user_exists("alice"));
    }
}
