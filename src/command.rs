//! Module `command`
//!
//! `Command` enum covering the full table from spec §4.4, plus the line
//! parser. Grounded in the teacher's `command.rs` (verb-uppercase,
//! `splitn(2, ...)` argument split, match-to-enum shape), extended from
//! its 10-command demo subset to the complete FTP command table.

#[derive(Debug, PartialEq, Clone)]
pub enum Command {
    Quit,
    User(String),
    Pass(String),
    Noop,
    Allo,
    SiteHelp,
    Help,
    Syst,
    Stru(String),
    Mode(String),
    Type(String),
    Clnt(String),
    Port(String),
    Pasv,
    List(String),
    Nlst(String),
    Cwd(String),
    Cdup,
    Feat,
    Mdtm(String),
    Pwd,
    Stat(String),
    Abor,
    Rest(String),
    Retr(String),
    Stor(String),
    Appe(String),
    Stou(String),
    Size(String),
    Dele(String),
    Rnfr(String),
    Rnto(String),
    Mkd(String),
    Rmd(String),
    Opts(String),
    Unknown(String),
}

/// Parses one command line (already stripped of CRLF) into a `Command`.
/// The verb is uppercased per RFC 959; `XCWD/XCUP/XPWD/XMKD/XRMD` are
/// accepted as aliases of their non-`X` counterparts (spec §4.4).
pub fn parse_command(raw: &str) -> Command {
    let trimmed = raw.trim();
    let mut parts = trimmed.splitn(2, char::is_whitespace);
    let verb = parts.next().unwrap_or("").to_ascii_uppercase();
    let arg = parts.next().unwrap_or("").trim().to_string();

    match verb.as_str() {
        "QUIT" => Command::Quit,
        "USER" => Command::User(arg),
        "PASS" => Command::Pass(arg),
        "NOOP" => Command::Noop,
        "ALLO" => Command::Allo,
        "SITE" => Command::SiteHelp,
        "HELP" => Command::Help,
        "SYST" => Command::Syst,
        "STRU" => Command::Stru(arg),
        "MODE" => Command::Mode(arg),
        "TYPE" => Command::Type(arg),
        "CLNT" => Command::Clnt(arg),
        "PORT" => Command::Port(arg),
        "PASV" => Command::Pasv,
        "LIST" => Command::List(arg),
        "NLST" => Command::Nlst(arg),
        "CWD" | "XCWD" => Command::Cwd(arg),
        "CDUP" | "XCUP" => Command::Cdup,
        "FEAT" => Command::Feat,
        "MDTM" => Command::Mdtm(arg),
        "PWD" | "XPWD" => Command::Pwd,
        "STAT" => Command::Stat(arg),
        "ABOR" => Command::Abor,
        "REST" => Command::Rest(arg),
        "RETR" => Command::Retr(arg),
        "STOR" => Command::Stor(arg),
        "APPE" => Command::Appe(arg),
        "STOU" => Command::Stou(arg),
        "SIZE" => Command::Size(arg),
        "DELE" => Command::Dele(arg),
        "RNFR" => Command::Rnfr(arg),
        "RNTO" => Command::Rnto(arg),
        "MKD" | "XMKD" => Command::Mkd(arg),
        "RMD" | "XRMD" => Command::Rmd(arg),
        "OPTS" => Command::Opts(arg),
        other => Command::Unknown(other.to_string()),
    }
}

/// Flags accepted by `LIST`/`NLST` (spec §4.4): `-a -d -F -l` in any order,
/// followed by an optional path. Unknown leading `-x` tokens are ignored,
/// matching common FTPD leniency toward client-sent listing flags.
#[derive(Debug, Default, Clone, Copy)]
pub struct ListFlags {
    pub all: bool,
    pub dir_itself: bool,
    pub classify: bool,
    pub long: bool,
}

pub fn parse_list_args(arg: &str, long_by_default: bool) -> (ListFlags, String) {
    let mut flags = ListFlags {
        long: long_by_default,
        ..ListFlags::default()
    };
    let mut path = String::new();

    for token in arg.split_whitespace() {
        if let Some(letters) = token.strip_prefix('-') {
            for c in letters.chars() {
                match c {
                    'a' => flags.all = true,
                    'd' => flags.dir_itself = true,
                    'F' => flags.classify = true,
                    'l' => flags.long = true,
                    _ => {}
                }
            }
        } else {
            path = token.to_string();
        }
    }
    (flags, path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_verb_with_argument() {
        assert_eq!(parse_command("USER alice"), Command::User("alice".into()));
        assert_eq!(parse_command("pass secret"), Command::Pass("secret".into()));
    }

    #[test]
    fn parses_a_bare_verb() {
        assert_eq!(parse_command("PWD"), Command::Pwd);
        assert_eq!(parse_command("quit"), Command::Quit);
    }

    #[test]
    fn aliases_x_commands() {
        assert_eq!(parse_command("XCWD /a"), Command::Cwd("/a".into()));
        assert_eq!(parse_command("XPWD"), Command::Pwd);
    }

    #[test]
    fn unknown_verb_is_preserved_for_the_500_reply() {
        assert_eq!(parse_command("FROB x"), Command::Unknown("FROB".into()));
    }

    #[test]
    fn list_flags_parse_independent_of_order() {
        let (flags, path) = parse_list_args("-la /docs", false);
        assert!(flags.long && flags.all);
        assert_eq!(path, "/docs");

        let (flags, path) = parse_list_args("", true);
        assert!(flags.long && !flags.all);
        assert_eq!(path, "");
    }
}
