/// A dotted association path such as `Orders.Details.Product`.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub enum IncludePath {
    #[default]
    None,
    Single(String),
    Child(String, Box<IncludePath>),
}

impl From<&str> for IncludePath {
    fn from(value: &str) -> Self {
        let mut last = None;
        for part in value.split('.').rev().map(str::trim) {
            if !part.is_empty() {
                last = match last {
                    Some(rest) => Some(IncludePath::Child(part.to_string(), Box::new(rest))),
                    None => Some(IncludePath::Single(part.to_string())),
                }
            }
        }
        last.unwrap_or(IncludePath::None)
    }
}

impl IncludePath {
    pub fn head(&self) -> Option<&str> {
        match self {
            IncludePath::None => None,
            IncludePath::Single(s) | IncludePath::Child(s, _) => Some(s),
        }
    }

    pub fn rest(&self) -> Option<&IncludePath> {
        match self {
            IncludePath::Child(_, rest) => Some(rest),
            _ => None,
        }
    }

    pub fn segments(&self) -> Vec<&str> {
        let mut out = Vec::new();
        let mut current = Some(self);
        while let Some(path) = current {
            out.extend(path.head());
            current = path.rest();
        }
        out
    }
}
