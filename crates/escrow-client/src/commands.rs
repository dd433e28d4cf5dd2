//! chat command grammar
//!
//! trades are negotiated inside a messaging conversation; a small set
//! of `/escrow` commands embedded in chat text dispatch into the
//! coordinator. the messaging layer owns delivery and rendering, this
//! module owns the grammar.

/// a parsed `/escrow` chat command
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EscrowCommand {
    /// open the trade creation flow
    Create,
    /// open the management view for the conversation's escrows
    Manage,
    /// show status; `number` picks one of several escrows in the
    /// conversation (1-based), latest when absent
    Status { number: Option<usize> },
    /// show the command reference
    Help,
}

impl EscrowCommand {
    pub const PREFIX: &'static str = "/escrow";

    /// parse a chat message
    ///
    /// `None` when the text is not an `/escrow` command at all. an
    /// unknown or malformed verb falls back to `Help` so the user gets
    /// the reference instead of silence.
    pub fn parse(text: &str) -> Option<EscrowCommand> {
        let mut words = text.split_whitespace();
        if words.next()? != Self::PREFIX {
            return None;
        }
        let command = match words.next() {
            Some("create") => EscrowCommand::Create,
            Some("manage") => EscrowCommand::Manage,
            Some("status") => match words.next() {
                None => EscrowCommand::Status { number: None },
                Some(word) => match word.parse::<usize>() {
                    Ok(number) if number >= 1 => EscrowCommand::Status {
                        number: Some(number),
                    },
                    _ => EscrowCommand::Help,
                },
            },
            None | Some("help") => EscrowCommand::Help,
            Some(_) => EscrowCommand::Help,
        };
        Some(command)
    }

    pub fn help_text() -> &'static str {
        "escrow commands:\n\
         /escrow create - start a new trade in this conversation\n\
         /escrow manage - view and act on this conversation's trades\n\
         /escrow status [n] - show the latest trade, or trade n\n\
         /escrow help - this reference"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_messages_are_not_commands() {
        assert_eq!(EscrowCommand::parse("hello there"), None);
        assert_eq!(EscrowCommand::parse(""), None);
        assert_eq!(EscrowCommand::parse("/escrowx create"), None);
        // prefix must be its own word
        assert_eq!(EscrowCommand::parse("see /escrow create"), None);
    }

    #[test]
    fn test_verbs() {
        assert_eq!(EscrowCommand::parse("/escrow create"), Some(EscrowCommand::Create));
        assert_eq!(EscrowCommand::parse("/escrow manage"), Some(EscrowCommand::Manage));
        assert_eq!(EscrowCommand::parse("/escrow help"), Some(EscrowCommand::Help));
        assert_eq!(
            EscrowCommand::parse("/escrow status"),
            Some(EscrowCommand::Status { number: None })
        );
        assert_eq!(
            EscrowCommand::parse("/escrow status 2"),
            Some(EscrowCommand::Status { number: Some(2) })
        );
    }

    #[test]
    fn test_whitespace_is_forgiven() {
        assert_eq!(
            EscrowCommand::parse("  /escrow   status   3  "),
            Some(EscrowCommand::Status { number: Some(3) })
        );
    }

    #[test]
    fn test_bad_input_falls_back_to_help() {
        assert_eq!(EscrowCommand::parse("/escrow"), Some(EscrowCommand::Help));
        assert_eq!(EscrowCommand::parse("/escrow frobnicate"), Some(EscrowCommand::Help));
        assert_eq!(EscrowCommand::parse("/escrow status zero"), Some(EscrowCommand::Help));
        assert_eq!(EscrowCommand::parse("/escrow status 0"), Some(EscrowCommand::Help));
    }
}
