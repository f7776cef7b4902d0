use std::collections::BTreeMap;

use crate::{EntityId, LedgerState, MoneyCents, MonthKey, MonthlyBudget};

impl LedgerState {
    /// Derives an envelope balance by folding the ledger:
    /// `Σ income − Σ expense` over the envelope's transactions.
    ///
    /// Transfer legs are ordinary rows, so a transfer moves money between two
    /// envelopes whichever leg is confirmed first.
    #[must_use]
    pub fn balance(&self, envelope_id: &EntityId) -> MoneyCents {
        self.transactions
            .values()
            .filter(|tx| &tx.envelope_id == envelope_id)
            .map(|tx| tx.signed_amount())
            .sum()
    }

    /// Balances of every envelope in the store, including empty ones.
    #[must_use]
    pub fn balances(&self) -> BTreeMap<EntityId, MoneyCents> {
        let mut balances: BTreeMap<EntityId, MoneyCents> = self
            .envelopes
            .keys()
            .map(|id| (id.clone(), MoneyCents::ZERO))
            .collect();
        for tx in self.transactions.values() {
            if let Some(balance) = balances.get_mut(&tx.envelope_id) {
                *balance += tx.signed_amount();
            }
        }
        balances
    }

    /// Aggregates income sources and allocations of `month`.
    #[must_use]
    pub fn monthly_budget(&self, user_id: &str, month: MonthKey) -> MonthlyBudget {
        let total_income: MoneyCents = self
            .income_sources
            .values()
            .filter(|s| s.month == month)
            .map(|s| s.amount)
            .sum();
        let total_allocated: MoneyCents = self
            .allocations
            .values()
            .filter(|a| a.month == month)
            .map(|a| a.budgeted_amount)
            .sum();
        MonthlyBudget {
            id: format!("{user_id}_{month}"),
            user_id: user_id.to_string(),
            month,
            total_income,
            total_allocated,
            available_to_budget: total_income - total_allocated,
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::{NaiveDate, Utc};

    use crate::{
        EntityId, Envelope, EnvelopeAllocation, IncomeFrequency, IncomeSource, LedgerState,
        MoneyCents, MonthKey, Transaction, TransactionKind,
    };

    fn state_with(names: &[&str]) -> LedgerState {
        let mut state = LedgerState::default();
        for (idx, name) in names.iter().enumerate() {
            let env = Envelope::new(
                EntityId::new(format!("env-{}", idx + 1)),
                "alice",
                name,
                idx as u32,
                None,
                Utc::now(),
            )
            .unwrap();
            state.insert_envelope(env).unwrap();
        }
        state
    }

    fn tx(id: &str, env: &str, kind: TransactionKind, cents: i64) -> Transaction {
        Transaction::new(
            EntityId::new(id),
            "alice",
            EntityId::new(env),
            kind,
            MoneyCents::new(cents),
            NaiveDate::from_ymd_opt(2025, 6, 10).unwrap(),
            None,
            Utc::now(),
        )
        .unwrap()
    }

    #[test]
    fn balance_folds_income_minus_expense() {
        let mut state = state_with(&["Groceries"]);
        state
            .insert_transaction(tx("t1", "env-1", TransactionKind::Income, 150_50))
            .unwrap();
        state
            .insert_transaction(tx("t2", "env-1", TransactionKind::Expense, 20_25))
            .unwrap();
        assert_eq!(state.balance(&EntityId::new("env-1")), MoneyCents::new(130_25));
        assert_eq!(state.balance(&EntityId::new("missing")), MoneyCents::ZERO);
    }

    #[test]
    fn transfer_moves_money_in_any_insertion_order() {
        let mut state = state_with(&["Savings", "Fun"]);
        let mut expense = tx("b", "env-1", TransactionKind::Expense, 40_00);
        let mut income = tx("a", "env-2", TransactionKind::Income, 40_00);
        expense.transfer_id = Some("tr-1".to_string());
        income.transfer_id = Some("tr-1".to_string());

        // Only the income leg landed so far.
        state.insert_transaction(income.clone()).unwrap();
        assert_eq!(state.balance(&EntityId::new("env-2")), MoneyCents::new(40_00));
        state.insert_transaction(expense).unwrap();

        let balances = state.balances();
        assert_eq!(balances[&EntityId::new("env-1")], MoneyCents::new(-40_00));
        assert_eq!(balances[&EntityId::new("env-2")], MoneyCents::new(40_00));
    }

    #[test]
    fn monthly_budget_subtracts_allocations_from_income() {
        let mut state = state_with(&["Rent"]);
        let june: MonthKey = "2025-06".parse().unwrap();
        state
            .insert_income_source(
                IncomeSource::new(
                    EntityId::new("inc-1"),
                    "alice",
                    june,
                    "Salary",
                    MoneyCents::new(2_000_00),
                    IncomeFrequency::Monthly,
                )
                .unwrap(),
            )
            .unwrap();
        state.allocations.insert(
            EntityId::new("alloc-1"),
            EnvelopeAllocation::new(
                EntityId::new("alloc-1"),
                "alice",
                EntityId::new("env-1"),
                june,
                MoneyCents::new(800_00),
            )
            .unwrap(),
        );

        let budget = state.monthly_budget("alice", june);
        assert_eq!(budget.id, "alice_2025-06");
        assert_eq!(budget.total_income, MoneyCents::new(2_000_00));
        assert_eq!(budget.available_to_budget, MoneyCents::new(1_200_00));

        let july = state.monthly_budget("alice", june.next());
        assert_eq!(july.available_to_budget, MoneyCents::ZERO);
    }
}
