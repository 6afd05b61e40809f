use std::cmp::Ordering;

use tallyport_core::{Transaction, TransactionType};

use crate::importer::ImportTransaction;

/// Balance modifications first, then ascending time.
pub fn compare_transactions(a: &Transaction, b: &Transaction) -> Ordering {
    priority(a).cmp(&priority(b)).then(a.transaction_time.cmp(&b.transaction_time))
}

fn priority(transaction: &Transaction) -> u8 {
    match transaction.transaction_type {
        TransactionType::ModifyBalance => 0,
        _ => 1,
    }
}

/// Stable: equal keys keep their input order.
pub fn sort_transactions(transactions: &mut [Transaction]) {
    transactions.sort_by(compare_transactions);
}

pub fn sort_import_transactions(transactions: &mut [ImportTransaction]) {
    transactions.sort_by(|a, b| compare_transactions(&a.transaction, &b.transaction));
}
