//! `/TAG/` data placeholders in script text.

use scriptbot_contracts::{ListField, ProjectionSpec};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Tag {
    Name,
    Goal,
    Hobby,
    Joy,
    Supporter,
}

impl Tag {
    pub const ALL: [Tag; 5] = [Tag::Name, Tag::Goal, Tag::Hobby, Tag::Joy, Tag::Supporter];

    pub fn marker(self) -> &'static str {
        match self {
            Tag::Name => "/NAME/",
            Tag::Goal => "/GOAL/",
            Tag::Hobby => "/HOBBY/",
            Tag::Joy => "/JOY/",
            Tag::Supporter => "/SUPPORTER/",
        }
    }

    pub fn list_field(self) -> Option<ListField> {
        match self {
            Tag::Name => None,
            Tag::Goal => Some(ListField::Goals),
            Tag::Hobby => Some(ListField::Hobbies),
            Tag::Joy => Some(ListField::Joys),
            Tag::Supporter => Some(ListField::Supporters),
        }
    }
}

enum Segment<'a> {
    Literal(&'a str),
    Tag(Tag),
}

fn segments(text: &str) -> Vec<Segment<'_>> {
    let mut out = Vec::new();
    let mut literal_start = 0;
    let mut pos = 0;
    while let Some(offset) = text[pos..].find('/') {
        let at = pos + offset;
        match Tag::ALL
            .iter()
            .copied()
            .find(|tag| text[at..].starts_with(tag.marker()))
        {
            Some(tag) => {
                if literal_start < at {
                    out.push(Segment::Literal(&text[literal_start..at]));
                }
                out.push(Segment::Tag(tag));
                pos = at + tag.marker().len();
                literal_start = pos;
            }
            None => pos = at + 1,
        }
    }
    if literal_start < text.len() {
        out.push(Segment::Literal(&text[literal_start..]));
    }
    out
}

/// Occurrences of each tag in a piece of script text.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PlaceholderCounts {
    pub name: usize,
    pub goals: usize,
    pub hobbies: usize,
    pub joys: usize,
    pub supporters: usize,
}

impl PlaceholderCounts {
    pub fn scan(text: &str) -> Self {
        let mut counts = Self::default();
        for segment in segments(text) {
            if let Segment::Tag(tag) = segment {
                *counts.slot_mut(tag) += 1;
            }
        }
        counts
    }

    pub fn get(&self, tag: Tag) -> usize {
        match tag {
            Tag::Name => self.name,
            Tag::Goal => self.goals,
            Tag::Hobby => self.hobbies,
            Tag::Joy => self.joys,
            Tag::Supporter => self.supporters,
        }
    }

    fn slot_mut(&mut self, tag: Tag) -> &mut usize {
        match tag {
            Tag::Name => &mut self.name,
            Tag::Goal => &mut self.goals,
            Tag::Hobby => &mut self.hobbies,
            Tag::Joy => &mut self.joys,
            Tag::Supporter => &mut self.supporters,
        }
    }

    pub fn is_empty(&self) -> bool {
        Tag::ALL.iter().all(|t| self.get(*t) == 0)
    }

    /// Store read needed to fill these placeholders.
    pub fn projection(&self) -> ProjectionSpec {
        ProjectionSpec {
            name: self.name > 0,
            goals: self.goals,
            hobbies: self.hobbies,
            joys: self.joys,
            supporters: self.supporters,
        }
    }
}

/// Plaintext values to substitute, in the order they should appear.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlaceholderValues {
    pub name: Option<String>,
    pub goals: Vec<String>,
    pub hobbies: Vec<String>,
    pub joys: Vec<String>,
    pub supporters: Vec<String>,
}

impl PlaceholderValues {
    pub fn list_mut(&mut self, field: ListField) -> &mut Vec<String> {
        match field {
            ListField::Goals => &mut self.goals,
            ListField::Hobbies => &mut self.hobbies,
            ListField::Joys => &mut self.joys,
            ListField::Supporters => &mut self.supporters,
        }
    }

    fn list(&self, field: ListField) -> &[String] {
        match field {
            ListField::Goals => &self.goals,
            ListField::Hobbies => &self.hobbies,
            ListField::Joys => &self.joys,
            ListField::Supporters => &self.supporters,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rendered {
    pub text: String,
    /// Tag occurrences left as literal text because no value was available.
    pub unfilled: Vec<Tag>,
}

/// Substitutes values left to right in one pass. Every `/NAME/` gets the
/// name; the n-th `/GOAL/` gets the n-th goal, and so on. Substituted values
/// are never scanned for tags.
pub fn render(template: &str, values: &PlaceholderValues) -> Rendered {
    let mut text = String::with_capacity(template.len());
    let mut unfilled = Vec::new();
    let mut used = [0usize; 4];

    for segment in segments(template) {
        match segment {
            Segment::Literal(lit) => text.push_str(lit),
            Segment::Tag(Tag::Name) => match &values.name {
                Some(name) => text.push_str(name),
                None => {
                    text.push_str(Tag::Name.marker());
                    unfilled.push(Tag::Name);
                }
            },
            Segment::Tag(tag) => {
                let Some(field) = tag.list_field() else {
                    continue;
                };
                let idx = list_index(field);
                match values.list(field).get(used[idx]) {
                    Some(value) => {
                        text.push_str(value);
                        used[idx] += 1;
                    }
                    None => {
                        text.push_str(tag.marker());
                        unfilled.push(tag);
                    }
                }
            }
        }
    }
    Rendered { text, unfilled }
}

fn list_index(field: ListField) -> usize {
    match field {
        ListField::Goals => 0,
        ListField::Hobbies => 1,
        ListField::Joys => 2,
        ListField::Supporters => 3,
    }
}
