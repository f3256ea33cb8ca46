/// One node of the navigation tree.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MenuItem {
    pub id: String,
    pub text: String,
    pub answer: Option<String>,
    pub children: Vec<MenuItem>,
}

impl MenuItem {
    /// Looks up the item at `path`, a list of ids relative to this item. An
    /// empty path is the item itself.
    pub fn find<S: AsRef<str>>(&self, path: &[S]) -> Option<&MenuItem> {
        match path.split_first() {
            None => Some(self),
            Some((head, tail)) => self
                .children
                .iter()
                .find(|child| child.id == head.as_ref())
                .and_then(|child| child.find(tail)),
        }
    }

    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }

    /// Every leaf below this item (or the item itself), in document order.
    pub fn leaves(&self) -> Vec<&MenuItem> {
        let mut leaves = Vec::new();
        self.collect_leaves(&mut leaves);
        leaves
    }

    fn collect_leaves<'a>(&'a self, leaves: &mut Vec<&'a MenuItem>) {
        if self.is_leaf() {
            leaves.push(self);
        } else {
            for child in self.children.iter() {
                child.collect_leaves(leaves);
            }
        }
    }
}
