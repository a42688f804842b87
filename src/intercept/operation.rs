use serde_json::Value;

/// Number of business parameters an operation takes, options and callback excluded.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum Arity {
    Zero,
    One,
    Two,
    Three,
}

impl Arity {
    pub fn count(self) -> usize {
        match self {
            Arity::Zero => 0,
            Arity::One => 1,
            Arity::Two => 2,
            Arity::Three => 3,
        }
    }
}

/// The fixed set of data operations that go through interception.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum Operation {
    Insert,
    Update,
    Upsert,
    Remove,
    Find,
    FindOne,
    Count,
    Distinct,
    FindAndModify,
    CreateIndex,
    DropIndex,
    DropCollection,
}

impl Operation {
    pub const ALL: [Operation; 12] = [
        Operation::Insert,
        Operation::Update,
        Operation::Upsert,
        Operation::Remove,
        Operation::Find,
        Operation::FindOne,
        Operation::Count,
        Operation::Distinct,
        Operation::FindAndModify,
        Operation::CreateIndex,
        Operation::DropIndex,
        Operation::DropCollection,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Operation::Insert => "insert",
            Operation::Update => "update",
            Operation::Upsert => "upsert",
            Operation::Remove => "remove",
            Operation::Find => "find",
            Operation::FindOne => "findOne",
            Operation::Count => "count",
            Operation::Distinct => "distinct",
            Operation::FindAndModify => "findAndModify",
            Operation::CreateIndex => "createIndex",
            Operation::DropIndex => "dropIndex",
            Operation::DropCollection => "dropCollection",
        }
    }

    pub fn from_name(name: &str) -> Option<Operation> {
        Operation::ALL.into_iter().find(|op| op.name() == name)
    }

    pub fn arity(self) -> Arity {
        match self {
            Operation::DropCollection => Arity::Zero,
            Operation::Insert
            | Operation::Remove
            | Operation::Find
            | Operation::FindOne
            | Operation::Count
            | Operation::CreateIndex
            | Operation::DropIndex => Arity::One,
            Operation::Update | Operation::Upsert | Operation::Distinct => Arity::Two,
            Operation::FindAndModify => Arity::Three,
        }
    }

    /// `find` is the one read that takes options only.
    pub fn accepts_callback(self) -> bool {
        self != Operation::Find
    }

    /// Upper bound on positional arguments: business parameters, options, callback.
    pub fn max_args(self) -> usize {
        self.arity().count() + 1 + usize::from(self.accepts_callback())
    }
}

/// Business parameters, shaped by arity.
#[derive(Debug, Clone, PartialEq)]
pub enum Params {
    Zero,
    One(Value),
    Two(Value, Value),
    Three(Value, Value, Value),
}

impl Params {
    pub fn arity(&self) -> Arity {
        match self {
            Params::Zero => Arity::Zero,
            Params::One(..) => Arity::One,
            Params::Two(..) => Arity::Two,
            Params::Three(..) => Arity::Three,
        }
    }

    /// Shape `values` for `arity`, padding missing trailing values with `Null`.
    ///
    /// Values beyond the arity are dropped; callers validate counts first.
    pub fn from_values(arity: Arity, values: Vec<Value>) -> Params {
        let mut it = values.into_iter();
        let mut next = || it.next().unwrap_or(Value::Null);
        match arity {
            Arity::Zero => Params::Zero,
            Arity::One => Params::One(next()),
            Arity::Two => {
                let a = next();
                Params::Two(a, next())
            }
            Arity::Three => {
                let a = next();
                let b = next();
                Params::Three(a, b, next())
            }
        }
    }
}
