mod support;

use rpb_client::{
    ClientError, ClientResult, Conflict, Document, FieldDescriptor, FieldValue, Many, One, Options,
};
use support::FakeStore;

#[derive(Debug, Default, Clone, PartialEq)]
struct Person {
    name: String,
    age: u32,
    pets: Many,
}

impl Document for Person {
    const TYPE_NAME: &'static str = "Person";
    const FIELDS: &'static [FieldDescriptor] = &[
        FieldDescriptor::scalar("name"),
        FieldDescriptor::scalar("age").renamed("years"),
        FieldDescriptor::many("pets"),
    ];

    fn read_field(&self, name: &str) -> ClientResult<Option<FieldValue>> {
        Ok(match name {
            "name" => Some(FieldValue::scalar(&self.name)?),
            "age" => Some(FieldValue::scalar(&self.age)?),
            "pets" => Some(FieldValue::Many(self.pets.clone())),
            _ => None,
        })
    }

    fn write_field(&mut self, name: &str, value: FieldValue) -> ClientResult<()> {
        match name {
            "name" => self.name = value.into_scalar(name)?,
            "age" => self.age = value.into_scalar(name)?,
            "pets" => self.pets = value.into_many(name)?,
            _ => {}
        }
        Ok(())
    }

    /// Oldest version wins.
    fn resolve(&mut self, _sibling_count: usize, conflict: &Conflict<'_>) -> ClientResult<()> {
        let versions: Vec<Person> = conflict.siblings()?;
        *self = versions
            .into_iter()
            .max_by_key(|person| person.age)
            .ok_or(ClientError::ResolveNotImplemented)?;
        Ok(())
    }
}

#[derive(Debug, Default, Clone, PartialEq)]
struct Pet {
    name: String,
    owner: One,
}

impl Document for Pet {
    const TYPE_NAME: &'static str = "Pet";
    const FIELDS: &'static [FieldDescriptor] =
        &[FieldDescriptor::scalar("name"), FieldDescriptor::one("owner")];

    fn read_field(&self, name: &str) -> ClientResult<Option<FieldValue>> {
        Ok(match name {
            "name" => Some(FieldValue::scalar(&self.name)?),
            "owner" => Some(FieldValue::One(self.owner.clone())),
            _ => None,
        })
    }

    fn write_field(&mut self, name: &str, value: FieldValue) -> ClientResult<()> {
        match name {
            "name" => self.name = value.into_scalar(name)?,
            "owner" => self.owner = value.into_one(name)?,
            _ => {}
        }
        Ok(())
    }
}

fn person(name: &str, age: u32) -> Person {
    Person {
        name: name.to_string(),
        age,
        ..Person::default()
    }
}

#[test]
fn document_round_trips_with_renamed_field() {
    let store = FakeStore::start();
    let client = store.client();

    let mut ann = client.new_model("people", "ann", person("Ann", 31));
    ann.save().expect("save");

    let raw = store.values("people", "ann").pop().expect("stored body");
    let body: serde_json::Value = serde_json::from_slice(&raw).expect("json");
    assert_eq!(body, serde_json::json!({"_type": "Person", "name": "Ann", "years": 31}));

    let loaded = client
        .load::<Person>("people", "ann", Options::default())
        .expect("load");
    assert_eq!(loaded.name, "Ann");
    assert_eq!(loaded.age, 31);
    assert_eq!(loaded.object().content_type, "application/json");
}

#[test]
fn relations_are_followed_through_links() {
    let store = FakeStore::start();
    let client = store.client();

    let mut ann = client.new_model("people", "ann", person("Ann", 31));
    ann.save().expect("save owner");

    let mut rex = client.new_model(
        "pets",
        "rex",
        Pet {
            name: "Rex".into(),
            ..Pet::default()
        },
    );
    rex.owner.set(&ann).expect("set owner");
    rex.save().expect("save pet");

    ann.pets.add(&rex).expect("add pet");
    ann.save().expect("save owner again");

    let loaded = client.load::<Person>("people", "ann", Options::default()).expect("load");
    assert_eq!(loaded.pets.len(), 1);
    let pets: Vec<_> = loaded.pets.load_all::<Pet>(&client).expect("load pets");
    assert_eq!(pets[0].name, "Rex");
    let owner = pets[0].owner.load::<Person>(&client).expect("load owner");
    assert_eq!(owner.key(), "ann");
    assert_eq!(owner.name, "Ann");
}

#[test]
fn save_without_key_takes_generated_key() {
    let store = FakeStore::start();
    let client = store.client();

    let mut model = client.new_model("people", "", person("Nobody", 1));
    model.save().expect("save");
    assert!(model.key().starts_with("gen"));

    let mut pet = Pet::default();
    pet.owner.set(&model).expect("saved model can be linked");
}

#[test]
fn conflicting_versions_resolve_on_load() {
    let store = FakeStore::start();
    store.set_allow_mult("people");
    let client = store.client();

    for age in [30, 45, 38] {
        client
            .new_model("people", "ann", person("Ann", age))
            .save()
            .expect("blind save");
    }
    assert_eq!(store.values("people", "ann").len(), 3);

    let mut loaded = client.load::<Person>("people", "ann", Options::default()).expect("load");
    assert_eq!(loaded.age, 45);
    assert!(!loaded.object().conflict());

    loaded.save().expect("save resolved");
    assert_eq!(store.values("people", "ann").len(), 1);
}

#[test]
fn unresolvable_conflict_surfaces_error() {
    let store = FakeStore::start();
    store.set_allow_mult("pets");
    let client = store.client();

    for name in ["Rex", "Max"] {
        let pet = Pet {
            name: name.into(),
            ..Pet::default()
        };
        client.new_model("pets", "p1", pet).save().expect("blind save");
    }

    let err = client.load::<Pet>("pets", "p1", Options::default()).unwrap_err();
    assert!(matches!(err, ClientError::ResolveNotImplemented));
}

#[test]
fn deleted_document_is_not_found() {
    let store = FakeStore::start();
    let client = store.client();

    let mut ann = client.new_model("people", "ann", person("Ann", 31));
    ann.save().expect("save");
    ann.delete().expect("delete");

    let err = client.load::<Person>("people", "ann", Options::default()).unwrap_err();
    assert!(err.is_not_found());
}
