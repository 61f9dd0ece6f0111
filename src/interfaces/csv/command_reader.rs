use crate::application::guard::SubmissionRequest;
use crate::domain::transaction::{Amount, ReferenceId, TransactionType};
use crate::domain::wallet::OwnerId;
use crate::error::{LedgerError, Result};
use serde::Deserialize;
use std::io::Read;

/// One row of a command file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Init(OwnerId),
    Enable(OwnerId),
    Disable(OwnerId),
    Submit(SubmissionRequest),
}

#[derive(Debug, Deserialize, Clone, Copy)]
#[serde(rename_all = "lowercase")]
enum CommandKind {
    Init,
    Enable,
    Disable,
    Deposit,
    Withdrawal,
}

#[derive(Debug, Deserialize)]
struct CommandRecord {
    command: CommandKind,
    owner: String,
    amount: Option<u64>,
    reference: Option<String>,
}

impl TryFrom<CommandRecord> for Command {
    type Error = LedgerError;

    fn try_from(record: CommandRecord) -> Result<Self> {
        let owner = OwnerId::new(record.owner)?;
        let r#type = match record.command {
            CommandKind::Init => return Ok(Command::Init(owner)),
            CommandKind::Enable => return Ok(Command::Enable(owner)),
            CommandKind::Disable => return Ok(Command::Disable(owner)),
            CommandKind::Deposit => TransactionType::Deposit,
            CommandKind::Withdrawal => TransactionType::Withdrawal,
        };
        let amount = record.amount.ok_or_else(|| {
            LedgerError::ValidationError(format!("{type} for {owner} requires an amount"))
        })?;
        let reference = record.reference.ok_or_else(|| {
            LedgerError::ValidationError(format!("{type} for {owner} requires a reference"))
        })?;
        Ok(Command::Submit(SubmissionRequest {
            owned_by: owner,
            r#type,
            amount: Amount::new(amount)?,
            reference_id: ReferenceId::new(reference)?,
        }))
    }
}

/// Reads wallet commands from a CSV source with header
/// `command, owner, amount, reference`.
///
/// Whitespace is trimmed and short rows are accepted, so lifecycle commands
/// may omit the trailing columns.
pub struct CommandReader<R: Read> {
    reader: csv::Reader<R>,
}

impl<R: Read> CommandReader<R> {
    pub fn new(source: R) -> Self {
        let reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .flexible(true)
            .from_reader(source);
        Self { reader }
    }

    /// Lazily parses each row; a bad row yields an error without ending the stream.
    pub fn commands(self) -> impl Iterator<Item = Result<Command>> {
        self.reader
            .into_deserialize::<CommandRecord>()
            .map(|result| result.map_err(LedgerError::from).and_then(Command::try_from))
    }
}
