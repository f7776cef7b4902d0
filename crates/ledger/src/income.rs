//! Income sources, partitioned by month.

use serde::{Deserialize, Serialize};

use crate::{
    EntityId, LedgerError, MoneyCents, MonthKey, ResultLedger,
    util::{ensure_non_negative, normalize_required_name},
};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IncomeFrequency {
    #[default]
    Monthly,
    Biweekly,
    Weekly,
    OneTime,
}

impl IncomeFrequency {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Monthly => "monthly",
            Self::Biweekly => "biweekly",
            Self::Weekly => "weekly",
            Self::OneTime => "one_time",
        }
    }
}

impl TryFrom<&str> for IncomeFrequency {
    type Error = LedgerError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value {
            "monthly" => Ok(Self::Monthly),
            "biweekly" => Ok(Self::Biweekly),
            "weekly" => Ok(Self::Weekly),
            "one_time" => Ok(Self::OneTime),
            other => Err(LedgerError::InvalidDocument(format!(
                "invalid income frequency: {other}"
            ))),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct IncomeSource {
    pub id: EntityId,
    pub user_id: String,
    pub month: MonthKey,
    pub name: String,
    /// Amount expected in `month`.
    pub amount: MoneyCents,
    pub frequency: IncomeFrequency,
}

impl IncomeSource {
    pub fn new(
        id: EntityId,
        user_id: &str,
        month: MonthKey,
        name: &str,
        amount: MoneyCents,
        frequency: IncomeFrequency,
    ) -> ResultLedger<Self> {
        ensure_non_negative(amount, "income amount")?;
        Ok(Self {
            id,
            user_id: user_id.to_string(),
            month,
            name: normalize_required_name(name, "income source")?,
            amount,
            frequency,
        })
    }

    pub fn rename(&mut self, name: &str) -> ResultLedger<()> {
        self.name = normalize_required_name(name, "income source")?;
        Ok(())
    }
}
